//! Device sessions, storages and lazily-listed object trees for MTP devices.
//!
//! The USB side lives behind `mtp::TransportProvider`. `mtp::VirtualTransport`
//! implements it in memory for tests and for the `mtp-probe` binary.

// Warn on unused code to catch dead code early
#![warn(unused)]
// Warn on unused dependencies
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

// criterion is only used in benches/
#[cfg(test)]
use criterion as _;

pub mod config;
mod ignore_poison;
pub mod mtp;

pub use config::{CoreConfig, init_logging, load_config};
pub use mtp::{
    DeviceRegistry, DeviceSession, DeviceSetDiff, DeviceSetTracker, DirectoryNode, FileNode, MtpError, ObjectNode,
    StorageHandle, TransportProvider, VirtualTransport,
};
