//! Device-set change tracking between detection passes.
//!
//! Detection is poll-based: callers run `detect_devices()` on their own
//! schedule and feed the resulting ids in here to learn what came and went.

use log::{debug, info};
use serde::Serialize;
use std::collections::HashSet;

/// Devices that appeared and disappeared since the previous observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl DeviceSetDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Remembers the last seen device ids.
#[derive(Debug, Default)]
pub struct DeviceSetTracker {
    known: Vec<String>,
}

impl DeviceSetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `current` as the new device set and returns how it differs from the last one.
    ///
    /// Both lists keep the order of their source (`current` for added, previous set for removed).
    pub fn observe(&mut self, current: &[String]) -> DeviceSetDiff {
        let previous: HashSet<&str> = self.known.iter().map(String::as_str).collect();
        let now: HashSet<&str> = current.iter().map(String::as_str).collect();

        let added: Vec<String> = current
            .iter()
            .filter(|id| !previous.contains(id.as_str()))
            .cloned()
            .collect();
        let removed: Vec<String> = self
            .known
            .iter()
            .filter(|id| !now.contains(id.as_str()))
            .cloned()
            .collect();

        for device_id in &added {
            info!("MTP device detected: {}", device_id);
        }
        for device_id in &removed {
            info!("MTP device removed: {}", device_id);
        }

        self.known = current.to_vec();
        debug!("Tracking {} device(s)", self.known.len());
        DeviceSetDiff { added, removed }
    }

    pub fn known(&self) -> &[String] {
        &self.known
    }
}
