//! Registry, session and subscription tests against the virtual transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use super::*;
use crate::ignore_poison::IgnorePoison;

const STORAGE: StorageId = 0x10001;

fn transport_with_devices(count: u8) -> Arc<VirtualTransport> {
    let transport = Arc::new(VirtualTransport::new());
    for i in 0..count {
        transport.add_device(VirtualDevice::new(1, 5 + i).with_storage(STORAGE, "Internal shared storage"));
    }
    transport
}

fn notification_counter(registry: &DeviceRegistry) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = Arc::clone(&count);
    registry.subscribe(move || {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    count
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_no_devices_notifies_once() {
    let transport = transport_with_devices(0);
    let registry = DeviceRegistry::new(transport.clone());
    let notified = notification_counter(&registry);

    assert_eq!(registry.initialize(), Err(MtpError::NoDeviceFound));
    assert_eq!(registry.device_count(), 0);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(registry.last_error(), "No devices found");
    assert!(registry.is_initialized());
}

#[test]
fn test_one_of_two_devices_fails_to_open() {
    let transport = transport_with_devices(2);
    transport.set_fail_open(0, true);
    let registry = DeviceRegistry::new(transport.clone());

    assert_eq!(registry.initialize(), Ok(1));
    assert_eq!(registry.device_count(), 1);
    assert_eq!(registry.raw_descriptors().len(), 2);
    assert_eq!(registry.device_ids(), vec!["mtp-1-6".to_string()]);
    assert_eq!(registry.last_error(), "");
}

#[test]
fn test_all_devices_fail_to_open() {
    let transport = transport_with_devices(2);
    transport.set_fail_open(0, true);
    transport.set_fail_open(1, true);
    let registry = DeviceRegistry::new(transport.clone());
    let notified = notification_counter(&registry);

    assert_eq!(registry.initialize(), Err(MtpError::ConnectionError));
    assert_eq!(registry.device_count(), 0);
    assert_eq!(registry.last_error(), "Error connecting to device");
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn test_detect_before_initialize() {
    let registry = DeviceRegistry::new(transport_with_devices(1));
    assert_eq!(registry.detect_devices(), Err(MtpError::NotInitialized));
    assert_eq!(registry.device_count(), 0);
}

#[test]
fn test_detect_twice_same_count_one_notification_each() {
    let transport = transport_with_devices(2);
    let registry = DeviceRegistry::new(transport.clone());
    let notified = notification_counter(&registry);

    assert_eq!(registry.initialize(), Ok(2));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(registry.detect_devices(), Ok(2));
    assert_eq!(notified.load(Ordering::SeqCst), 2);
    assert_eq!(registry.device_count(), 2);
}

#[test]
fn test_detect_twice_with_no_devices() {
    let registry = DeviceRegistry::new(transport_with_devices(0));
    let notified = notification_counter(&registry);

    assert!(registry.initialize().is_err());
    assert!(registry.detect_devices().is_err());
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}

#[test]
fn test_redetect_releases_previous_sessions() {
    let transport = transport_with_devices(1);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();
    registry.detect_devices().unwrap();

    assert_eq!(transport.released_sessions().len(), 1);
    assert_eq!(transport.open_session_count(), 1);
    assert_eq!(registry.live_session_count(), 1);
}

#[test]
fn test_enumeration_error_codes() {
    let cases = [
        (TransportCode::NO_DEVICE_ATTACHED, MtpError::NoDeviceFound),
        (TransportCode::CONNECTING, MtpError::ConnectionError),
        (TransportCode::MEMORY_ALLOCATION, MtpError::AllocationError),
        (TransportCode(42), MtpError::TransportUnknown { code: 42 }),
    ];
    for (code, expected) in cases {
        let transport = transport_with_devices(1);
        transport.set_enumerate_error(Some(code));
        let registry = DeviceRegistry::new(transport.clone());
        assert_eq!(registry.initialize(), Err(expected.clone()));
        assert_eq!(registry.last_error(), expected.to_string());
    }
}

#[test]
fn test_enumeration_error_notifies_only_when_devices_dropped() {
    let transport = transport_with_devices(1);
    let registry = DeviceRegistry::new(transport.clone());
    let notified = notification_counter(&registry);
    registry.initialize().unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    transport.set_enumerate_error(Some(TransportCode::USB_LAYER));
    assert!(registry.detect_devices().is_err());
    assert_eq!(registry.device_count(), 0);
    assert_eq!(notified.load(Ordering::SeqCst), 2);

    // Nothing left to drop
    assert!(registry.detect_devices().is_err());
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unplugged_device_disappears_on_next_detection() {
    let transport = transport_with_devices(2);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();

    transport.set_attached(0, false);
    assert_eq!(registry.detect_devices(), Ok(1));
    assert!(registry.find_device("mtp-1-5").is_none());
    assert!(registry.find_device("mtp-1-6").is_some());
}

#[test]
fn test_device_at_out_of_range() {
    let registry = DeviceRegistry::new(transport_with_devices(2));
    registry.initialize().unwrap();
    assert!(registry.device_at(0).is_some());
    assert!(registry.device_at(1).is_some());
    for i in 2..5 {
        assert!(registry.device_at(i).is_none());
    }
    assert_eq!(registry.all_devices().len(), 2);
}

#[test]
fn test_concurrent_detection() {
    let registry = Arc::new(DeviceRegistry::new(transport_with_devices(3)));
    registry.initialize().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..5 {
                    registry.detect_devices().unwrap();
                    assert!(registry.device_count() <= 3);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.device_count(), 3);
    assert_eq!(registry.live_session_count(), 3);
}

// ============================================================================
// Initialization and shutdown
// ============================================================================

#[test]
fn test_transport_initialized_once() {
    let transport = transport_with_devices(1);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();
    assert_eq!(registry.initialize(), Ok(1));
    registry.shutdown();
    registry.initialize().unwrap();
    assert_eq!(transport.init_count(), 1);
}

#[test]
fn test_shutdown_is_idempotent_and_releases() {
    let transport = transport_with_devices(2);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();

    registry.shutdown();
    registry.shutdown();
    assert!(!registry.is_initialized());
    assert_eq!(registry.device_count(), 0);
    assert!(registry.raw_descriptors().is_empty());
    assert_eq!(transport.open_session_count(), 0);
    assert_eq!(registry.detect_devices(), Err(MtpError::NotInitialized));
}

#[test]
fn test_shared_session_outlives_shutdown() {
    let transport = transport_with_devices(1);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();
    let device = registry.device_at(0).unwrap();

    registry.shutdown();
    assert_eq!(transport.open_session_count(), 1);
    assert!(device.lock_ignore_poison().is_open());

    drop(device);
    assert_eq!(transport.open_session_count(), 0);
    assert_eq!(transport.released_sessions().len(), 1);
}

// ============================================================================
// Subscriptions
// ============================================================================

#[test]
fn test_unsubscribe_succeeds_once() {
    let registry = DeviceRegistry::new(transport_with_devices(0));
    let id = registry.subscribe(|| {});
    assert!(registry.unsubscribe(id));
    assert!(!registry.unsubscribe(id));
    assert_eq!(registry.subscriber_count(), 0);
}

#[test]
fn test_subscription_ids_are_monotonic() {
    let registry = DeviceRegistry::new(transport_with_devices(0));
    let first = registry.subscribe(|| {});
    let second = registry.subscribe(|| {});
    assert_eq!(first, 1);
    assert_eq!(second, 2);
    registry.unsubscribe(second);
    assert_eq!(registry.subscribe(|| {}), 3);
}

#[test]
fn test_unsubscribed_callback_is_not_called() {
    let registry = DeviceRegistry::new(transport_with_devices(1));
    let kept = notification_counter(&registry);
    let removed = Arc::new(AtomicUsize::new(0));
    let removed_clone = Arc::clone(&removed);
    let id = registry.subscribe(move || {
        removed_clone.fetch_add(1, Ordering::SeqCst);
    });
    registry.unsubscribe(id);

    registry.initialize().unwrap();
    assert_eq!(kept.load(Ordering::SeqCst), 1);
    assert_eq!(removed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_callback_can_reenter_registry() {
    let registry = Arc::new(DeviceRegistry::new(transport_with_devices(2)));
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = Arc::clone(&seen);
    let registry_clone = Arc::clone(&registry);
    registry.subscribe(move || {
        // Would deadlock if callbacks ran under the registry lock
        seen_clone.store(registry_clone.device_count(), Ordering::SeqCst);
    });

    registry.initialize().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn test_session_identity_fallbacks() {
    let registry = DeviceRegistry::new(transport_with_devices(1));
    registry.initialize().unwrap();
    let device = registry.device_at(0).unwrap();
    let session = device.lock_ignore_poison();

    assert_eq!(session.friendly_name(), "Unknown Device");
    assert_eq!(session.manufacturer(), "Unknown Manufacturer");
    assert_eq!(session.model(), "Unknown Model");
    assert_eq!(session.serial_number(), "Unknown Serial");
    assert_eq!(session.firmware_version(), "Unknown Version");
    assert_eq!(session.mtp_version(), "1.0");
}

#[test]
fn test_session_identity_reported() {
    let transport = Arc::new(VirtualTransport::new());
    let mut device = VirtualDevice::new(3, 7).with_identity(VirtualIdentity {
        friendly_name: Some("Ann's phone".to_string()),
        manufacturer: Some("Google".to_string()),
        model: Some("Pixel 8".to_string()),
        serial_number: Some("ABC123".to_string()),
        firmware_version: Some("UQ1A.240205".to_string()),
    });
    device.descriptor.device_version = 0x0102;
    transport.add_device(device);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();

    let shared = registry.find_device("mtp-3-7").unwrap();
    let session = shared.lock_ignore_poison();
    let summary = session.summary();
    assert_eq!(summary.friendly_name, "Ann's phone");
    assert_eq!(summary.model, "Pixel 8");
    assert_eq!(summary.serial_number, "ABC123");
    assert_eq!(summary.mtp_version, "1.2");
    assert!(summary.storages.is_empty());
}

#[test]
fn test_storage_at_out_of_range() {
    let transport = Arc::new(VirtualTransport::new());
    transport.add_device(
        VirtualDevice::new(1, 5)
            .with_storage(1, "Internal")
            .with_storage(2, "SD card"),
    );
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();
    let device = registry.device_at(0).unwrap();
    let session = device.lock_ignore_poison();

    assert_eq!(session.storage_count(), 2);
    assert_eq!(session.storage_at(0).map(|s| s.id()), Some(1));
    assert_eq!(session.storage_at(1).map(|s| s.description().to_string()).as_deref(), Some("SD card"));
    assert!(session.storage_at(2).is_none());
    assert_eq!(session.find_storage(2).map(|s| s.id()), Some(2));
    assert_eq!(session.all_storages().len(), 2);
}

#[test]
fn test_storage_load_failure_leaves_usable_session() {
    let transport = transport_with_devices(1);
    transport.set_fail_storage_list(0, true);
    let registry = DeviceRegistry::new(transport.clone());
    assert_eq!(registry.initialize(), Ok(1));

    let device = registry.device_at(0).unwrap();
    let mut session = device.lock_ignore_poison();
    assert_eq!(session.storage_count(), 0);
    assert_eq!(session.last_error(), "PTP: Storage list unavailable");

    transport.set_fail_storage_list(0, false);
    assert!(session.refresh_storages());
    assert_eq!(session.storage_count(), 1);
    assert_eq!(session.last_error(), "");
}

#[test]
fn test_storage_load_failure_without_message() {
    let transport = transport_with_devices(1);
    transport.set_fail_storage_list(0, true);
    transport.set_silent_failures(true);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();

    let device = registry.device_at(0).unwrap();
    assert_eq!(device.lock_ignore_poison().last_error(), "Failed to get storage list");
}

#[test]
fn test_refresh_with_zero_storages_is_false_without_error() {
    let transport = Arc::new(VirtualTransport::new());
    transport.add_device(VirtualDevice::new(1, 5));
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();

    let device = registry.device_at(0).unwrap();
    let mut session = device.lock_ignore_poison();
    assert!(!session.refresh_storages());
    assert_eq!(session.last_error(), "");
}

#[test]
fn test_refresh_replaces_storage_set() {
    let registry = DeviceRegistry::new(transport_with_devices(1));
    registry.initialize().unwrap();
    let device = registry.device_at(0).unwrap();
    let mut session = device.lock_ignore_poison();

    let before = session.all_storages();
    assert!(session.refresh_storages());
    assert_eq!(session.storage_count(), 1);
    // Snapshots taken earlier are independent of the refresh
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].id(), STORAGE);
}

#[test]
fn test_close_makes_storages_stale() {
    let transport = transport_with_devices(1);
    let registry = DeviceRegistry::new(transport.clone());
    registry.initialize().unwrap();
    let device = registry.device_at(0).unwrap();

    let mut storage = device.lock_ignore_poison().storage_at(0).unwrap();
    device.lock_ignore_poison().close();
    device.lock_ignore_poison().close();

    assert_eq!(transport.released_sessions().len(), 1);
    assert!(!device.lock_ignore_poison().is_open());
    assert_eq!(device.lock_ignore_poison().storage_count(), 0);

    assert!(storage.list_children(ROOT_OBJECT_ID).is_empty());
    assert_eq!(storage.last_error(), "Device session has been released");
    assert!(matches!(storage.try_list_children(ROOT_OBJECT_ID), Err(MtpError::StaleHandle)));
    assert_eq!(device.lock_ignore_poison().friendly_name(), "Unknown Device");

    // Dropping the closed session must not release again
    registry.shutdown();
    drop(device);
    assert_eq!(transport.released_sessions().len(), 1);
}

#[test]
fn test_refresh_after_close_records_stale_handle() {
    let registry = DeviceRegistry::new(transport_with_devices(1));
    registry.initialize().unwrap();
    let device = registry.device_at(0).unwrap();
    let mut session = device.lock_ignore_poison();
    session.close();

    assert!(!session.refresh_storages());
    assert_eq!(session.last_error(), "Device session has been released");
}

#[test]
fn test_summary_serialization() {
    let registry = DeviceRegistry::new(transport_with_devices(1));
    registry.initialize().unwrap();
    let device = registry.device_at(0).unwrap();
    let summary = device.lock_ignore_poison().summary();

    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"deviceId\":\"mtp-1-5\""), "JSON: {}", json);
    assert!(json.contains("\"displayName\":\"Virtual Pixel\""), "JSON: {}", json);
    assert!(json.contains("\"mtpVersion\":\"1.0\""), "JSON: {}", json);
    assert!(json.contains("\"description\":\"Internal shared storage\""), "JSON: {}", json);
}

#[test]
fn test_tracker_follows_detection() {
    let transport = transport_with_devices(2);
    let registry = DeviceRegistry::new(transport.clone());
    let mut tracker = DeviceSetTracker::new();

    registry.initialize().unwrap();
    let diff = tracker.observe(&registry.device_ids());
    assert_eq!(diff.added.len(), 2);

    transport.set_attached(1, false);
    registry.detect_devices().unwrap();
    let diff = tracker.observe(&registry.device_ids());
    assert!(diff.added.is_empty());
    assert_eq!(diff.removed, vec!["mtp-1-6".to_string()]);
}
