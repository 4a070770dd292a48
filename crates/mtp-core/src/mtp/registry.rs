//! Device discovery and the set of open sessions.
//!
//! The registry owns every `DeviceSession` it opens and hands them out as
//! shared handles. All registry state sits behind one mutex; subscriber
//! callbacks are copied out under it and invoked after it is released, so a
//! callback may call back into the registry.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

use super::errors::MtpError;
use super::handle::SessionArena;
use super::session::DeviceSession;
use super::transport::TransportProvider;
use super::types::RawDeviceDescriptor;
use crate::ignore_poison::IgnorePoison;

/// A session as handed out by the registry. Released when the last clone drops.
pub type SharedSession = Arc<Mutex<DeviceSession>>;

/// Identifies a change subscription. Issued from 1 upwards, never reused.
pub type SubscriptionId = u64;

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

struct DeviceEntry {
    device_id: String,
    session: SharedSession,
}

struct RegistryState {
    initialized: bool,
    /// Survives `shutdown()`: the transport is set up once per registry.
    transport_ready: bool,
    raw_descriptors: Vec<RawDeviceDescriptor>,
    devices: Vec<DeviceEntry>,
    subscribers: Vec<(SubscriptionId, ChangeCallback)>,
    next_subscription_id: SubscriptionId,
    last_error: String,
}

impl RegistryState {
    fn callbacks(&self) -> Vec<ChangeCallback> {
        self.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// Discovers devices through a transport and keeps their sessions open.
pub struct DeviceRegistry {
    transport: Arc<dyn TransportProvider>,
    arena: Arc<SessionArena>,
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    pub fn new(transport: Arc<dyn TransportProvider>) -> Self {
        Self {
            transport,
            arena: Arc::new(SessionArena::new()),
            state: Mutex::new(RegistryState {
                initialized: false,
                transport_ready: false,
                raw_descriptors: Vec::new(),
                devices: Vec::new(),
                subscribers: Vec::new(),
                next_subscription_id: 1,
                last_error: String::new(),
            }),
        }
    }

    /// Sets up the transport (first call only) and runs a first detection.
    ///
    /// Calling it again while initialized returns the current device count without detecting.
    pub fn initialize(&self) -> Result<usize, MtpError> {
        {
            let mut state = self.state.lock_ignore_poison();
            if state.initialized {
                return Ok(state.devices.len());
            }
            if !state.transport_ready {
                self.transport.initialize();
                state.transport_ready = true;
                debug!("Transport initialized");
            }
            state.initialized = true;
        }
        self.detect_devices()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock_ignore_poison().initialized
    }

    /// Drops the current device set, enumerates again and opens every device found.
    ///
    /// Returns the number of open sessions. Devices that fail to open are
    /// skipped; the call only fails when nothing is attached, nothing could be
    /// opened, or enumeration itself failed. Subscribers are notified once per
    /// pass, after the lock is released. A failed enumeration notifies only
    /// when it dropped devices.
    pub fn detect_devices(&self) -> Result<usize, MtpError> {
        let (result, callbacks) = {
            let mut guard = self.state.lock_ignore_poison();
            let state = &mut *guard;
            if !state.initialized {
                return Err(MtpError::NotInitialized);
            }

            let had_devices = !state.devices.is_empty();
            state.devices.clear();
            state.raw_descriptors.clear();

            let enumeration = self.transport.enumerate();
            let enumerated = enumeration.is_ok();
            let result = match enumeration {
                Err(code) => {
                    let err = MtpError::from_enumeration_code(code);
                    warn!("Device enumeration failed (code {}): {}", code, err);
                    Err(err)
                }
                Ok(descriptors) => {
                    state.raw_descriptors = descriptors;
                    self.open_all(state)
                }
            };

            match &result {
                Ok(_) => state.last_error.clear(),
                Err(e) => state.last_error = e.to_string(),
            }

            let callbacks = if enumerated || had_devices {
                state.callbacks()
            } else {
                Vec::new()
            };
            (result, callbacks)
        };

        debug!("Notifying {} subscriber(s) of device changes", callbacks.len());
        for callback in callbacks {
            callback();
        }
        result
    }

    fn open_all(&self, state: &mut RegistryState) -> Result<usize, MtpError> {
        if state.raw_descriptors.is_empty() {
            info!("No MTP devices attached");
            return Err(MtpError::NoDeviceFound);
        }

        for (index, descriptor) in state.raw_descriptors.iter().enumerate() {
            match DeviceSession::open(Arc::clone(&self.transport), Arc::clone(&self.arena), descriptor.clone()) {
                Ok(session) => state.devices.push(DeviceEntry {
                    device_id: descriptor.device_id(),
                    session: Arc::new(Mutex::new(session)),
                }),
                Err(code) => warn!(
                    "Failed to open device at index {} ({}), code {}",
                    index,
                    descriptor.device_id(),
                    code
                ),
            }
        }

        info!(
            "Detected {} device(s), opened {}",
            state.raw_descriptors.len(),
            state.devices.len()
        );
        if state.devices.is_empty() {
            Err(MtpError::ConnectionError)
        } else {
            Ok(state.devices.len())
        }
    }

    pub fn device_count(&self) -> usize {
        self.state.lock_ignore_poison().devices.len()
    }

    /// The session at `index`, or `None` when out of range.
    pub fn device_at(&self, index: usize) -> Option<SharedSession> {
        self.state
            .lock_ignore_poison()
            .devices
            .get(index)
            .map(|entry| Arc::clone(&entry.session))
    }

    pub fn all_devices(&self) -> Vec<SharedSession> {
        self.state
            .lock_ignore_poison()
            .devices
            .iter()
            .map(|entry| Arc::clone(&entry.session))
            .collect()
    }

    /// Ids ("mtp-{bus}-{address}") of the open devices, in detection order.
    pub fn device_ids(&self) -> Vec<String> {
        self.state
            .lock_ignore_poison()
            .devices
            .iter()
            .map(|entry| entry.device_id.clone())
            .collect()
    }

    pub fn find_device(&self, device_id: &str) -> Option<SharedSession> {
        self.state
            .lock_ignore_poison()
            .devices
            .iter()
            .find(|entry| entry.device_id == device_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Descriptors from the last enumeration, including devices that failed to open.
    pub fn raw_descriptors(&self) -> Vec<RawDeviceDescriptor> {
        self.state.lock_ignore_poison().raw_descriptors.clone()
    }

    /// Registers a callback fired after each change to the device set.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.state.lock_ignore_poison();
        let id = state.next_subscription_id;
        state.next_subscription_id += 1;
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscription. False if the id is unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock_ignore_poison();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);
        state.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock_ignore_poison().subscribers.len()
    }

    pub fn last_error(&self) -> String {
        self.state.lock_ignore_poison().last_error.clone()
    }

    /// Sessions still holding a transport handle, including ones kept alive by callers.
    pub fn live_session_count(&self) -> usize {
        self.arena.live_count()
    }

    /// Drops every device and returns to the uninitialized state. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let mut state = self.state.lock_ignore_poison();
        if !state.initialized && state.devices.is_empty() {
            return;
        }
        let dropped = state.devices.len();
        state.devices.clear();
        state.raw_descriptors.clear();
        state.initialized = false;
        info!("Device registry shut down, dropped {} device(s)", dropped);
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock_ignore_poison();
        f.debug_struct("DeviceRegistry")
            .field("initialized", &state.initialized)
            .field("devices", &state.devices.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}
