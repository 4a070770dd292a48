//! Command-line probe over a virtual MTP transport.
//!
//! Loads devices from a JSON fixture and runs the session layer against them,
//! the same way an app would against real hardware.
//!
//! Usage:
//!   mtp-probe [--config PATH] [--fixture PATH] devices
//!   mtp-probe [...] ls <device-id> <storage-id> [path]
//!   mtp-probe [...] get <device-id> <storage-id> <path> <local-path>
//!   mtp-probe [...] watch [--iterations N]
//!
//! Storage ids accept decimal or 0x-prefixed hex. Without a fixture, a
//! built-in two-device sample is used.
//!
//! Environment variables:
//!   MTP_CORE_CONFIG - Config file path (see `mtp_core::config`)
//!   RUST_LOG - Log filter, overrides the config's `logFilter`

use log::{debug, error};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use mtp_core::config::{self, CoreConfig};
use mtp_core::mtp::{DeviceRegistry, DeviceSetTracker, ObjectNode, StorageId, VirtualTransport};

const SAMPLE_FIXTURE: &str = include_str!("../../fixtures/sample_device.json");

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    fixture: Option<PathBuf>,
    iterations: Option<u64>,
    positional: Vec<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => options.config = Some(args.next().ok_or("--config needs a path")?.into()),
            "--fixture" => options.fixture = Some(args.next().ok_or("--fixture needs a path")?.into()),
            "--iterations" => {
                let value = args.next().ok_or("--iterations needs a number")?;
                options.iterations = Some(value.parse().map_err(|_| format!("Invalid iteration count: {}", value))?);
            }
            _ => options.positional.push(arg),
        }
    }
    Ok(options)
}

fn parse_storage_id(value: &str) -> Result<StorageId, String> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => StorageId::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| format!("Invalid storage id: {}", value))
}

fn load_transport(options: &Options, config: &CoreConfig) -> Result<VirtualTransport, String> {
    match options.fixture.as_ref().or(config.fixture_path.as_ref()) {
        Some(path) => VirtualTransport::from_fixture_file(path).map_err(|e| e.to_string()),
        None => VirtualTransport::from_fixture_json(SAMPLE_FIXTURE).map_err(|e| e.to_string()),
    }
}

fn main() -> ExitCode {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("mtp-probe: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = config::load_config(options.config.as_deref());
    config::init_logging(&config.log_filter);
    debug!("Using config {:?}", config);

    match run(&options, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("mtp-probe: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(options: &Options, config: &CoreConfig) -> Result<(), String> {
    let transport = Arc::new(load_transport(options, config)?);
    let registry = DeviceRegistry::new(transport);

    let positional: Vec<&str> = options.positional.iter().map(String::as_str).collect();
    match positional.as_slice() {
        ["devices"] => list_devices(&registry),
        ["ls", device, storage] => list_path(&registry, device, parse_storage_id(storage)?, "/"),
        ["ls", device, storage, path] => list_path(&registry, device, parse_storage_id(storage)?, path),
        ["get", device, storage, path, local] => {
            download(&registry, device, parse_storage_id(storage)?, path, Path::new(local))
        }
        ["watch"] => watch(&registry, config, options.iterations),
        _ => Err("Usage: mtp-probe [--config PATH] [--fixture PATH] devices | ls <device> <storage> [path] | get <device> <storage> <path> <local> | watch [--iterations N]".to_string()),
    }
}

fn list_devices(registry: &DeviceRegistry) -> Result<(), String> {
    // No devices is a valid answer here, not a failure
    let _ = registry.initialize();
    let summaries: Vec<_> = registry
        .all_devices()
        .iter()
        .map(|device| device.lock().map(|session| session.summary()))
        .collect::<Result<_, _>>()
        .map_err(|_| "Device session lock poisoned".to_string())?;
    let json = serde_json::to_string_pretty(&summaries).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn open_storage(
    registry: &DeviceRegistry,
    device_id: &str,
    storage_id: StorageId,
) -> Result<mtp_core::StorageHandle, String> {
    registry.initialize().map_err(|e| e.user_message())?;
    let device = registry
        .find_device(device_id)
        .ok_or_else(|| format!("Device not found: {}", device_id))?;
    let session = device.lock().map_err(|_| "Device session lock poisoned".to_string())?;
    session
        .find_storage(storage_id)
        .ok_or_else(|| format!("Storage {:#x} not found on {}", storage_id, device_id))
}

fn print_entry(node: &ObjectNode) {
    let kind = if node.is_directory() { 'd' } else { '-' };
    println!("{} {:>12} {:>8}  {}", kind, node.size(), node.id(), node.name());
}

fn list_path(registry: &DeviceRegistry, device_id: &str, storage_id: StorageId, path: &str) -> Result<(), String> {
    let mut storage = open_storage(registry, device_id, storage_id)?;
    let node = storage.resolve_path(path).map_err(|e| e.to_string())?;
    match node {
        ObjectNode::Directory(mut dir) => {
            let children = dir.try_list_children().map_err(|e| e.to_string())?;
            for child in &children {
                print_entry(child);
            }
        }
        file @ ObjectNode::File(_) => print_entry(&file),
    }
    Ok(())
}

fn download(
    registry: &DeviceRegistry,
    device_id: &str,
    storage_id: StorageId,
    path: &str,
    local: &Path,
) -> Result<(), String> {
    let mut storage = open_storage(registry, device_id, storage_id)?;
    let mut node = storage.resolve_path(path).map_err(|e| e.to_string())?;
    node.download(local).map_err(|e| e.to_string())?;
    println!("Downloaded {} ({} bytes) to {}", path, node.size(), local.display());
    Ok(())
}

fn watch(registry: &DeviceRegistry, config: &CoreConfig, iterations: Option<u64>) -> Result<(), String> {
    let _ = registry.initialize();
    let mut tracker = DeviceSetTracker::new();
    let mut pass = 0u64;
    loop {
        if pass > 0 {
            // Errors are reflected in the device set; nothing else to do with them here
            let _ = registry.detect_devices();
        }
        let diff = tracker.observe(&registry.device_ids());
        if !diff.is_empty() {
            println!("{}", serde_json::to_string(&diff).map_err(|e| e.to_string())?);
        }

        pass += 1;
        if iterations.is_some_and(|limit| pass >= limit) {
            return Ok(());
        }
        thread::sleep(config.poll_interval());
    }
}
