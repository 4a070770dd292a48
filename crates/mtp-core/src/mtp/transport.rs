//! The seam between this crate and whatever actually talks to the device.
//!
//! A `TransportProvider` enumerates raw devices, opens and releases sessions,
//! and runs session-scoped commands. Failing commands return a `TransportCode`;
//! a human-readable message for the most recent failure is available once
//! through `last_transport_error`.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use super::types::{IdentityField, ObjectDescriptor, ObjectId, RawDeviceDescriptor, StorageDescriptor, StorageId};

/// Opaque handle of an open transport session. Only meaningful to the provider that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionHandle(pub u64);

/// Numeric status code reported by a failing transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransportCode(pub i32);

impl TransportCode {
    pub const GENERAL: Self = Self(1);
    pub const PTP_LAYER: Self = Self(2);
    pub const USB_LAYER: Self = Self(3);
    pub const MEMORY_ALLOCATION: Self = Self(4);
    pub const NO_DEVICE_ATTACHED: Self = Self(5);
    pub const STORAGE_FULL: Self = Self(6);
    pub const CONNECTING: Self = Self(7);
    pub const CANCELLED: Self = Self(8);
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type TransportResult<T> = Result<T, TransportCode>;

/// Everything the session layer needs from a device transport.
///
/// Implementations must be shareable across threads; the registry hands the
/// same provider to every session it opens.
pub trait TransportProvider: Send + Sync {
    /// One-time process setup. Called at most once per registry.
    fn initialize(&self) {}

    /// Lists attached devices without opening them.
    fn enumerate(&self) -> TransportResult<Vec<RawDeviceDescriptor>>;

    /// Opens a session on the given device.
    fn open(&self, descriptor: &RawDeviceDescriptor) -> TransportResult<SessionHandle>;

    /// Releases a session. The handle is invalid afterwards.
    fn release(&self, session: SessionHandle);

    /// Returns an identity string, or `None` when the device doesn't report it.
    fn identity(&self, session: SessionHandle, field: IdentityField) -> Option<String>;

    fn list_storages(&self, session: SessionHandle) -> TransportResult<Vec<StorageDescriptor>>;

    /// Lists direct children of `parent_id` (0 = storage root) in device order.
    fn list_children(
        &self,
        session: SessionHandle,
        storage_id: StorageId,
        parent_id: ObjectId,
    ) -> TransportResult<Vec<ObjectDescriptor>>;

    fn fetch_metadata(&self, session: SessionHandle, object_id: ObjectId) -> TransportResult<ObjectDescriptor>;

    /// Creates a folder and returns its id. An id of 0 means the device refused.
    fn create_folder(
        &self,
        session: SessionHandle,
        name: &str,
        parent_id: ObjectId,
        storage_id: StorageId,
    ) -> TransportResult<ObjectId>;

    fn delete_object(&self, session: SessionHandle, object_id: ObjectId) -> TransportResult<()>;

    /// Copies an object's content to a local file, replacing it if present.
    fn download_to_path(&self, session: SessionHandle, object_id: ObjectId, local_path: &Path) -> TransportResult<()>;

    /// Sends a local file to the device and returns the new object's id (0 = refused).
    fn send_file(
        &self,
        session: SessionHandle,
        local_path: &Path,
        remote_name: &str,
        parent_id: ObjectId,
        storage_id: StorageId,
    ) -> TransportResult<ObjectId>;

    /// Takes the message of the most recent failure on this session, if any.
    ///
    /// Must be polled right after the failing call; reading clears it.
    fn last_transport_error(&self, session: SessionHandle) -> Option<String>;
}
