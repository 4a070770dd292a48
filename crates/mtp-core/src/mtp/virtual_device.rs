//! In-memory MTP transport for tests, benchmarks and the probe binary.
//!
//! Holds a set of fake devices with storages and an object tree, and lets
//! tests inject the failures real hardware produces: enumeration errors,
//! devices that won't open, storage lists that fail, folder creation that
//! answers with id 0, and failures that leave no message behind.
//!
//! Fixtures are JSON:
//!
//! ```json
//! {
//!   "devices": [{
//!     "descriptor": { "bus": 1, "address": 5, "vendorId": 6353, "productId": 20193, "product": "Pixel 8" },
//!     "manufacturer": "Google",
//!     "storages": [{ "id": 65537, "description": "Internal shared storage", "maxCapacity": 1000, "freeSpace": 500 }],
//!     "entries": [
//!       { "storageId": 65537, "path": "/DCIM/Camera/IMG_0001.jpg", "content": "jpeg bytes" },
//!       { "storageId": 65537, "path": "/Music", "folder": true }
//!     ]
//!   }]
//! }
//! ```

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::transport::{SessionHandle, TransportCode, TransportProvider, TransportResult};
use super::types::{
    IdentityField, ObjectDescriptor, ObjectId, ObjectKind, ROOT_OBJECT_ID, RawDeviceDescriptor, StorageDescriptor,
    StorageId,
};
use crate::ignore_poison::IgnorePoison;

/// Identity strings a virtual device reports. `None` means "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualIdentity {
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

impl VirtualIdentity {
    fn get(&self, field: IdentityField) -> Option<&String> {
        match field {
            IdentityField::FriendlyName => self.friendly_name.as_ref(),
            IdentityField::Manufacturer => self.manufacturer.as_ref(),
            IdentityField::Model => self.model.as_ref(),
            IdentityField::SerialNumber => self.serial_number.as_ref(),
            IdentityField::FirmwareVersion => self.firmware_version.as_ref(),
        }
    }
}

/// A fake device: what enumeration reports plus what an open session sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDevice {
    pub descriptor: RawDeviceDescriptor,
    #[serde(flatten)]
    pub identity: VirtualIdentity,
    #[serde(default)]
    pub storages: Vec<StorageDescriptor>,
    /// Refuse to open sessions.
    #[serde(default)]
    pub fail_open: bool,
    /// Fail every storage list request.
    #[serde(default)]
    pub fail_storage_list: bool,
}

impl VirtualDevice {
    /// A Pixel-like device on the given port with no storages.
    pub fn new(bus: u8, address: u8) -> Self {
        Self {
            descriptor: RawDeviceDescriptor {
                bus,
                address,
                vendor_id: 0x18d1,
                product_id: 0x4ee1,
                vendor: Some("Google".to_string()),
                product: Some("Virtual Pixel".to_string()),
                serial_hint: None,
                device_version: 0x0100,
            },
            identity: VirtualIdentity::default(),
            storages: Vec::new(),
            fail_open: false,
            fail_storage_list: false,
        }
    }

    pub fn with_storage(mut self, id: StorageId, description: &str) -> Self {
        self.storages.push(StorageDescriptor {
            id,
            description: Some(description.to_string()),
            max_capacity: 64 * 1024 * 1024 * 1024,
            free_space: 32 * 1024 * 1024 * 1024,
            storage_type: Some("FixedRAM".to_string()),
            read_only: false,
        });
        self
    }

    pub fn with_identity(mut self, identity: VirtualIdentity) -> Self {
        self.identity = identity;
        self
    }
}

/// One object to create when loading a fixture. Missing parent folders are created.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureEntry {
    storage_id: StorageId,
    path: String,
    #[serde(default)]
    folder: bool,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureDevice {
    #[serde(flatten)]
    device: VirtualDevice,
    #[serde(default)]
    entries: Vec<FixtureEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct Fixture {
    #[serde(default)]
    devices: Vec<FixtureDevice>,
}

/// Failure to load a fixture file.
#[derive(Debug)]
pub enum FixtureError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for FixtureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Couldn't read fixture: {}", e),
            Self::Parse(e) => write!(f, "Couldn't parse fixture: {}", e),
        }
    }
}

impl std::error::Error for FixtureError {}

impl From<std::io::Error> for FixtureError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for FixtureError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

#[derive(Debug)]
struct VirtualObject {
    descriptor: ObjectDescriptor,
    content: Vec<u8>,
}

#[derive(Debug)]
struct DeviceState {
    device: VirtualDevice,
    attached: bool,
    /// In creation order, which is also listing order.
    objects: Vec<VirtualObject>,
}

impl DeviceState {
    fn object(&self, id: ObjectId) -> Option<&VirtualObject> {
        self.objects.iter().find(|obj| obj.descriptor.id == id)
    }

    fn has_storage(&self, storage_id: StorageId) -> bool {
        self.device.storages.iter().any(|s| s.id == storage_id)
    }

    /// Whether `parent_id` can hold children on `storage_id`.
    fn valid_parent(&self, storage_id: StorageId, parent_id: ObjectId) -> bool {
        parent_id == ROOT_OBJECT_ID
            || self
                .object(parent_id)
                .is_some_and(|obj| obj.descriptor.is_folder() && obj.descriptor.storage_id == storage_id)
    }
}

#[derive(Debug)]
struct State {
    devices: Vec<DeviceState>,
    /// Open session id -> device index.
    sessions: HashMap<u64, usize>,
    last_errors: HashMap<u64, String>,
    next_session: u64,
    next_object_id: ObjectId,
    enumerate_error: Option<TransportCode>,
    zero_folder_ids: bool,
    silent_failures: bool,
    init_count: usize,
    released: Vec<SessionHandle>,
}

impl State {
    fn fail<T>(&mut self, session: SessionHandle, code: TransportCode, message: &str) -> TransportResult<T> {
        if !self.silent_failures {
            self.last_errors.insert(session.0, message.to_string());
        }
        Err(code)
    }

    fn device_index(&mut self, session: SessionHandle) -> TransportResult<usize> {
        match self.sessions.get(&session.0) {
            Some(&index) => Ok(index),
            None => self.fail(session, TransportCode::GENERAL, "Session not open"),
        }
    }

    fn insert_object(
        &mut self,
        device: usize,
        storage_id: StorageId,
        parent_id: ObjectId,
        name: &str,
        kind: ObjectKind,
        content: Vec<u8>,
    ) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        let size = if kind == ObjectKind::Folder { 0 } else { content.len() as u64 };
        self.devices[device].objects.push(VirtualObject {
            descriptor: ObjectDescriptor {
                id,
                parent_id,
                storage_id,
                name: name.to_string(),
                size,
                kind,
                modified: Some(1_700_000_000),
            },
            content,
        });
        id
    }

    /// Creates `path` and any missing folders above it, returning the leaf id.
    fn insert_path(&mut self, device: usize, entry: &FixtureEntry) -> ObjectId {
        let parts: Vec<&str> = entry.path.split('/').filter(|p| !p.is_empty()).collect();
        let mut parent = ROOT_OBJECT_ID;
        for (i, part) in parts.iter().enumerate() {
            let is_leaf = i + 1 == parts.len();
            if is_leaf && !entry.folder {
                return self.insert_object(
                    device,
                    entry.storage_id,
                    parent,
                    part,
                    ObjectKind::File,
                    entry.content.as_bytes().to_vec(),
                );
            }
            let existing = self.devices[device].objects.iter().find(|obj| {
                obj.descriptor.parent_id == parent
                    && obj.descriptor.storage_id == entry.storage_id
                    && obj.descriptor.name == *part
                    && obj.descriptor.is_folder()
            });
            parent = match existing.map(|obj| obj.descriptor.id) {
                Some(id) => id,
                None => self.insert_object(device, entry.storage_id, parent, part, ObjectKind::Folder, Vec::new()),
            };
        }
        parent
    }
}

/// In-memory `TransportProvider`.
#[derive(Debug)]
pub struct VirtualTransport {
    state: Mutex<State>,
}

impl Default for VirtualTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                devices: Vec::new(),
                sessions: HashMap::new(),
                last_errors: HashMap::new(),
                next_session: 1,
                next_object_id: 1,
                enumerate_error: None,
                zero_folder_ids: false,
                silent_failures: false,
                init_count: 0,
                released: Vec::new(),
            }),
        }
    }

    pub fn from_fixture_json(json: &str) -> Result<Self, serde_json::Error> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let transport = Self::new();
        for fixture_device in fixture.devices {
            let index = transport.add_device(fixture_device.device);
            let mut state = transport.state.lock_ignore_poison();
            for entry in &fixture_device.entries {
                state.insert_path(index, entry);
            }
        }
        Ok(transport)
    }

    pub fn from_fixture_file(path: &Path) -> Result<Self, FixtureError> {
        let json = std::fs::read_to_string(path)?;
        let transport = Self::from_fixture_json(&json)?;
        debug!("Loaded virtual devices from {}", path.display());
        Ok(transport)
    }

    /// Attaches a device and returns its index for the other builder calls.
    pub fn add_device(&self, device: VirtualDevice) -> usize {
        let mut state = self.state.lock_ignore_poison();
        state.devices.push(DeviceState {
            device,
            attached: true,
            objects: Vec::new(),
        });
        state.devices.len() - 1
    }

    /// Adds a folder directly, bypassing parent checks.
    pub fn add_folder(&self, device: usize, storage_id: StorageId, parent_id: ObjectId, name: &str) -> ObjectId {
        self.state
            .lock_ignore_poison()
            .insert_object(device, storage_id, parent_id, name, ObjectKind::Folder, Vec::new())
    }

    pub fn add_file(
        &self,
        device: usize,
        storage_id: StorageId,
        parent_id: ObjectId,
        name: &str,
        content: &[u8],
    ) -> ObjectId {
        self.state
            .lock_ignore_poison()
            .insert_object(device, storage_id, parent_id, name, ObjectKind::File, content.to_vec())
    }

    /// Plugs or unplugs a device. Unplugged devices don't enumerate; open sessions stay usable.
    pub fn set_attached(&self, device: usize, attached: bool) {
        self.state.lock_ignore_poison().devices[device].attached = attached;
    }

    pub fn set_enumerate_error(&self, code: Option<TransportCode>) {
        self.state.lock_ignore_poison().enumerate_error = code;
    }

    pub fn set_fail_open(&self, device: usize, fail: bool) {
        self.state.lock_ignore_poison().devices[device].device.fail_open = fail;
    }

    pub fn set_fail_storage_list(&self, device: usize, fail: bool) {
        self.state.lock_ignore_poison().devices[device].device.fail_storage_list = fail;
    }

    /// Makes folder creation answer with id 0 instead of an error.
    pub fn set_zero_folder_ids(&self, enabled: bool) {
        self.state.lock_ignore_poison().zero_folder_ids = enabled;
    }

    /// Stops failures from leaving a message for `last_transport_error`.
    pub fn set_silent_failures(&self, enabled: bool) {
        self.state.lock_ignore_poison().silent_failures = enabled;
    }

    /// How often `initialize()` was called.
    pub fn init_count(&self) -> usize {
        self.state.lock_ignore_poison().init_count
    }

    pub fn released_sessions(&self) -> Vec<SessionHandle> {
        self.state.lock_ignore_poison().released.clone()
    }

    pub fn open_session_count(&self) -> usize {
        self.state.lock_ignore_poison().sessions.len()
    }

    pub fn object_exists(&self, device: usize, object_id: ObjectId) -> bool {
        self.state.lock_ignore_poison().devices[device].object(object_id).is_some()
    }

    pub fn file_content(&self, device: usize, object_id: ObjectId) -> Option<Vec<u8>> {
        self.state.lock_ignore_poison().devices[device]
            .object(object_id)
            .map(|obj| obj.content.clone())
    }
}

impl TransportProvider for VirtualTransport {
    fn initialize(&self) {
        self.state.lock_ignore_poison().init_count += 1;
    }

    fn enumerate(&self) -> TransportResult<Vec<RawDeviceDescriptor>> {
        let state = self.state.lock_ignore_poison();
        if let Some(code) = state.enumerate_error {
            return Err(code);
        }
        Ok(state
            .devices
            .iter()
            .filter(|dev| dev.attached)
            .map(|dev| dev.device.descriptor.clone())
            .collect())
    }

    fn open(&self, descriptor: &RawDeviceDescriptor) -> TransportResult<SessionHandle> {
        let mut state = self.state.lock_ignore_poison();
        let index = state
            .devices
            .iter()
            .position(|dev| dev.device.descriptor == *descriptor)
            .ok_or(TransportCode::NO_DEVICE_ATTACHED)?;
        if state.devices[index].device.fail_open {
            return Err(TransportCode::USB_LAYER);
        }
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(id, index);
        Ok(SessionHandle(id))
    }

    fn release(&self, session: SessionHandle) {
        let mut state = self.state.lock_ignore_poison();
        if state.sessions.remove(&session.0).is_some() {
            state.released.push(session);
        }
        state.last_errors.remove(&session.0);
    }

    fn identity(&self, session: SessionHandle, field: IdentityField) -> Option<String> {
        let state = self.state.lock_ignore_poison();
        let index = *state.sessions.get(&session.0)?;
        state.devices[index].device.identity.get(field).cloned()
    }

    fn list_storages(&self, session: SessionHandle) -> TransportResult<Vec<StorageDescriptor>> {
        let mut state = self.state.lock_ignore_poison();
        let index = state.device_index(session)?;
        if state.devices[index].device.fail_storage_list {
            return state.fail(session, TransportCode::PTP_LAYER, "PTP: Storage list unavailable");
        }
        Ok(state.devices[index].device.storages.clone())
    }

    fn list_children(
        &self,
        session: SessionHandle,
        storage_id: StorageId,
        parent_id: ObjectId,
    ) -> TransportResult<Vec<ObjectDescriptor>> {
        let mut state = self.state.lock_ignore_poison();
        let index = state.device_index(session)?;
        let dev = &state.devices[index];
        if !dev.has_storage(storage_id) {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid storage id");
        }
        if !dev.valid_parent(storage_id, parent_id) {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid parent object");
        }
        Ok(dev
            .objects
            .iter()
            .filter(|obj| obj.descriptor.storage_id == storage_id && obj.descriptor.parent_id == parent_id)
            .map(|obj| obj.descriptor.clone())
            .collect())
    }

    fn fetch_metadata(&self, session: SessionHandle, object_id: ObjectId) -> TransportResult<ObjectDescriptor> {
        let mut state = self.state.lock_ignore_poison();
        let index = state.device_index(session)?;
        let descriptor = state.devices[index].object(object_id).map(|obj| obj.descriptor.clone());
        match descriptor {
            Some(descriptor) => Ok(descriptor),
            None => state.fail(session, TransportCode::PTP_LAYER, "Invalid object handle"),
        }
    }

    fn create_folder(
        &self,
        session: SessionHandle,
        name: &str,
        parent_id: ObjectId,
        storage_id: StorageId,
    ) -> TransportResult<ObjectId> {
        let mut state = self.state.lock_ignore_poison();
        let index = state.device_index(session)?;
        if state.zero_folder_ids {
            return Ok(ROOT_OBJECT_ID);
        }
        let dev = &state.devices[index];
        if !dev.has_storage(storage_id) {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid storage id");
        }
        if !dev.valid_parent(storage_id, parent_id) {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid parent object");
        }
        if name.is_empty() {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid object name");
        }
        Ok(state.insert_object(index, storage_id, parent_id, name, ObjectKind::Folder, Vec::new()))
    }

    fn delete_object(&self, session: SessionHandle, object_id: ObjectId) -> TransportResult<()> {
        let mut state = self.state.lock_ignore_poison();
        let index = state.device_index(session)?;
        let dev = &state.devices[index];
        if dev.object(object_id).is_none() {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid object handle");
        }
        if dev.objects.iter().any(|obj| obj.descriptor.parent_id == object_id) {
            return state.fail(session, TransportCode::PTP_LAYER, "PTP: Folder is not empty");
        }
        state.devices[index].objects.retain(|obj| obj.descriptor.id != object_id);
        Ok(())
    }

    fn download_to_path(&self, session: SessionHandle, object_id: ObjectId, local_path: &Path) -> TransportResult<()> {
        let mut state = self.state.lock_ignore_poison();
        let index = state.device_index(session)?;
        let object = state.devices[index]
            .object(object_id)
            .map(|obj| (obj.descriptor.is_folder(), obj.content.clone()));
        let content = match object {
            None => return state.fail(session, TransportCode::PTP_LAYER, "Invalid object handle"),
            Some((true, _)) => return state.fail(session, TransportCode::PTP_LAYER, "Cannot download a folder"),
            Some((false, content)) => content,
        };
        if let Err(e) = std::fs::write(local_path, &content) {
            return state.fail(session, TransportCode::GENERAL, &format!("Local write failed: {}", e));
        }
        Ok(())
    }

    fn send_file(
        &self,
        session: SessionHandle,
        local_path: &Path,
        remote_name: &str,
        parent_id: ObjectId,
        storage_id: StorageId,
    ) -> TransportResult<ObjectId> {
        let mut state = self.state.lock_ignore_poison();
        let index = state.device_index(session)?;
        let dev = &state.devices[index];
        if !dev.has_storage(storage_id) {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid storage id");
        }
        if !dev.valid_parent(storage_id, parent_id) {
            return state.fail(session, TransportCode::PTP_LAYER, "Invalid parent object");
        }
        let content = match std::fs::read(local_path) {
            Ok(content) => content,
            Err(e) => return state.fail(session, TransportCode::GENERAL, &format!("Local read failed: {}", e)),
        };
        Ok(state.insert_object(index, storage_id, parent_id, remote_name, ObjectKind::File, content))
    }

    fn last_transport_error(&self, session: SessionHandle) -> Option<String> {
        self.state.lock_ignore_poison().last_errors.remove(&session.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_with_device() -> (VirtualTransport, SessionHandle) {
        let transport = VirtualTransport::new();
        let index = transport.add_device(VirtualDevice::new(1, 5).with_storage(0x10001, "Internal"));
        let photos = transport.add_folder(index, 0x10001, ROOT_OBJECT_ID, "Photos");
        transport.add_file(index, 0x10001, photos, "a.jpg", b"jpeg");
        let descriptor = transport.enumerate().unwrap().remove(0);
        let session = transport.open(&descriptor).unwrap();
        (transport, session)
    }

    #[test]
    fn test_object_ids_start_at_one() {
        let transport = VirtualTransport::new();
        let index = transport.add_device(VirtualDevice::new(1, 5));
        assert_eq!(transport.add_folder(index, 1, ROOT_OBJECT_ID, "A"), 1);
        assert_eq!(transport.add_folder(index, 1, ROOT_OBJECT_ID, "B"), 2);
    }

    #[test]
    fn test_side_channel_is_cleared_after_read() {
        let (transport, session) = transport_with_device();
        assert!(transport.fetch_metadata(session, 999).is_err());
        assert_eq!(
            transport.last_transport_error(session).as_deref(),
            Some("Invalid object handle")
        );
        assert_eq!(transport.last_transport_error(session), None);
    }

    #[test]
    fn test_silent_failures_leave_no_message() {
        let (transport, session) = transport_with_device();
        transport.set_silent_failures(true);
        assert!(transport.fetch_metadata(session, 999).is_err());
        assert_eq!(transport.last_transport_error(session), None);
    }

    #[test]
    fn test_non_empty_folder_cannot_be_deleted() {
        let (transport, session) = transport_with_device();
        let photos = transport.list_children(session, 0x10001, ROOT_OBJECT_ID).unwrap()[0].id;
        assert!(transport.delete_object(session, photos).is_err());
        assert!(transport.object_exists(0, photos));
    }

    #[test]
    fn test_released_session_is_not_open() {
        let (transport, session) = transport_with_device();
        transport.release(session);
        assert_eq!(transport.open_session_count(), 0);
        assert_eq!(transport.released_sessions(), vec![session]);
        assert!(transport.list_storages(session).is_err());
        assert_eq!(transport.last_transport_error(session).as_deref(), Some("Session not open"));
    }

    #[test]
    fn test_detached_device_is_not_enumerated() {
        let (transport, _session) = transport_with_device();
        transport.set_attached(0, false);
        assert!(transport.enumerate().unwrap().is_empty());
    }

    #[test]
    fn test_fixture_creates_intermediate_folders() {
        let json = r#"{
            "devices": [{
                "descriptor": { "bus": 2, "address": 3, "vendorId": 1256, "productId": 26720 },
                "manufacturer": "Samsung",
                "storages": [{ "id": 1, "maxCapacity": 100, "freeSpace": 50 }],
                "entries": [
                    { "storageId": 1, "path": "/DCIM/Camera/one.jpg", "content": "1" },
                    { "storageId": 1, "path": "/DCIM/Camera/two.jpg", "content": "22" },
                    { "storageId": 1, "path": "/Music", "folder": true }
                ]
            }]
        }"#;
        let transport = VirtualTransport::from_fixture_json(json).unwrap();
        let descriptor = transport.enumerate().unwrap().remove(0);
        let session = transport.open(&descriptor).unwrap();

        let root = transport.list_children(session, 1, ROOT_OBJECT_ID).unwrap();
        let names: Vec<_> = root.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["DCIM", "Music"]);

        let camera = transport.list_children(session, 1, root[0].id).unwrap();
        assert_eq!(camera.len(), 1);
        let photos = transport.list_children(session, 1, camera[0].id).unwrap();
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[1].size, 2);
        assert_eq!(
            transport.identity(session, IdentityField::Manufacturer).as_deref(),
            Some("Samsung")
        );
        assert_eq!(transport.identity(session, IdentityField::Model), None);
    }

    #[test]
    fn test_invalid_fixture_is_an_error() {
        assert!(VirtualTransport::from_fixture_json("{ not json").is_err());
    }
}
