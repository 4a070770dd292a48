//! An open device session and the storages derived from it.

use log::{debug, error, info};
use std::sync::Arc;

use super::errors::MtpError;
use super::handle::{SessionArena, SessionLink};
use super::storage::StorageHandle;
use super::transport::{TransportCode, TransportProvider};
use super::types::{DeviceSummary, IdentityField, RawDeviceDescriptor, StorageId};

const STORAGE_LIST_FAILED: &str = "Failed to get storage list";

/// Sole owner of one transport session.
///
/// Dropping or closing the session releases the transport handle exactly once.
/// Storage handles and nodes taken from it keep working until then and report
/// `MtpError::StaleHandle` afterwards.
#[derive(Debug)]
pub struct DeviceSession {
    link: SessionLink,
    descriptor: RawDeviceDescriptor,
    storages: Vec<StorageHandle>,
    last_error: String,
}

impl DeviceSession {
    /// Opens a session on `descriptor` and loads its storage list.
    ///
    /// A failed storage load doesn't fail the open; the session starts with no storages.
    pub fn open(
        transport: Arc<dyn TransportProvider>,
        arena: Arc<SessionArena>,
        descriptor: RawDeviceDescriptor,
    ) -> Result<Self, TransportCode> {
        let handle = transport.open(&descriptor)?;
        let key = arena.insert(handle);
        let mut session = Self {
            link: SessionLink::new(transport, arena, key),
            descriptor,
            storages: Vec::new(),
            last_error: String::new(),
        };

        if !session.refresh_storages() && !session.last_error.is_empty() {
            error!(
                "Couldn't load storages for {}: {}",
                session.device_id(),
                session.last_error
            );
        }
        info!(
            "Opened session for {} ({}) with {} storage(s)",
            session.display_name(),
            session.device_id(),
            session.storages.len()
        );
        Ok(session)
    }

    pub fn descriptor(&self) -> &RawDeviceDescriptor {
        &self.descriptor
    }

    pub fn device_id(&self) -> String {
        self.descriptor.device_id()
    }

    pub fn display_name(&self) -> String {
        self.descriptor.display_name()
    }

    /// Whether the transport session is still held.
    pub fn is_open(&self) -> bool {
        self.link.is_alive()
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    fn identity(&self, field: IdentityField) -> String {
        let Ok(session) = self.link.session() else {
            return field.fallback().to_string();
        };
        self.link
            .transport()
            .identity(session, field)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| field.fallback().to_string())
    }

    pub fn friendly_name(&self) -> String {
        self.identity(IdentityField::FriendlyName)
    }

    pub fn manufacturer(&self) -> String {
        self.identity(IdentityField::Manufacturer)
    }

    pub fn model(&self) -> String {
        self.identity(IdentityField::Model)
    }

    pub fn serial_number(&self) -> String {
        self.identity(IdentityField::SerialNumber)
    }

    pub fn firmware_version(&self) -> String {
        self.identity(IdentityField::FirmwareVersion)
    }

    /// "major.minor" from the descriptor's 16-bit version (high byte major, low byte minor).
    pub fn mtp_version(&self) -> String {
        let version = self.descriptor.device_version;
        format!("{}.{}", version >> 8, version & 0xFF)
    }

    /// Replaces the storage set with the device's current list.
    ///
    /// Returns false on failure and when the device reports no storages; only
    /// the former sets `last_error()`.
    pub fn refresh_storages(&mut self) -> bool {
        self.storages.clear();

        let loaded = self.link.session().and_then(|session| {
            self.link
                .transport()
                .list_storages(session)
                .map_err(|_| MtpError::OperationFailed {
                    message: self.link.failure_message(session, STORAGE_LIST_FAILED),
                })
        });

        match loaded {
            Ok(descriptors) => {
                self.last_error.clear();
                self.storages = descriptors
                    .into_iter()
                    .map(|desc| StorageHandle::new(self.link.clone(), desc))
                    .collect();
                debug!("{} reports {} storage(s)", self.device_id(), self.storages.len());
                !self.storages.is_empty()
            }
            Err(e) => {
                self.last_error = e.to_string();
                false
            }
        }
    }

    pub fn storage_count(&self) -> usize {
        self.storages.len()
    }

    /// A handle to the storage at `index`, or `None` when out of range.
    pub fn storage_at(&self, index: usize) -> Option<StorageHandle> {
        self.storages.get(index).cloned()
    }

    pub fn find_storage(&self, storage_id: StorageId) -> Option<StorageHandle> {
        self.storages.iter().find(|storage| storage.id() == storage_id).cloned()
    }

    /// Snapshot of the current storage set.
    pub fn all_storages(&self) -> Vec<StorageHandle> {
        self.storages.clone()
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            device_id: self.device_id(),
            display_name: self.display_name(),
            friendly_name: self.friendly_name(),
            manufacturer: self.manufacturer(),
            model: self.model(),
            serial_number: self.serial_number(),
            firmware_version: self.firmware_version(),
            mtp_version: self.mtp_version(),
            storages: self.storages.iter().map(StorageHandle::info).collect(),
        }
    }

    /// Releases the transport session now instead of on drop. Safe to call twice.
    pub fn close(&mut self) {
        if self.link.release() {
            info!("Closed session for {}", self.device_id());
        }
        self.storages.clear();
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.link.release() {
            debug!("Session for {} released on drop", self.descriptor.device_id());
        }
    }
}
