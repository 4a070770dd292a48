//! MTP (Media Transfer Protocol) device sessions and object trees.
//!
//! # Architecture
//!
//! - `transport`: The `TransportProvider` seam to whatever speaks USB
//! - `registry`: Device discovery, open sessions, change subscriptions
//! - `session`: One open device and its storages
//! - `storage`: One storage partition and its object operations
//! - `node`: File and directory nodes built from listings
//! - `handle`: Generation-checked links from storages and nodes back to their session
//! - `tracker`: Added/removed diffs between detection passes
//! - `virtual_device`: In-memory transport with fixtures and failure injection
//!
//! Nothing here spawns threads. Hot-plug is handled by calling
//! `DeviceRegistry::detect_devices()` on a poll interval.

mod errors;
mod handle;
mod node;
mod registry;
mod session;
mod storage;
mod tracker;
pub mod transport;
pub mod types;
pub mod virtual_device;

pub use errors::MtpError;
pub use handle::{SessionArena, SessionKey, SessionLink};
pub use node::{DirectoryNode, FileNode, ObjectNode};
pub use registry::{DeviceRegistry, SharedSession, SubscriptionId};
pub use session::DeviceSession;
pub use storage::StorageHandle;
pub use tracker::{DeviceSetDiff, DeviceSetTracker};
pub use transport::{SessionHandle, TransportCode, TransportProvider, TransportResult};
pub use types::{
    DeviceSummary, IdentityField, ObjectDescriptor, ObjectId, ObjectKind, ROOT_OBJECT_ID, RawDeviceDescriptor,
    StorageDescriptor, StorageId, StorageInfo,
};
pub use virtual_device::{VirtualDevice, VirtualIdentity, VirtualTransport};

#[cfg(test)]
mod registry_test;
