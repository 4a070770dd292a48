//! Generation-checked session handles.
//!
//! A `DeviceSession` is the only owner of its transport session. Storages and
//! object nodes derived from it hold a `SessionLink`, which names the session
//! by arena slot and generation instead of by handle. Once the session is
//! released the slot's generation moves on, and every link still pointing at
//! the old generation resolves to `MtpError::StaleHandle`.

use log::debug;
use std::fmt;
use std::sync::{Arc, Mutex};

use super::errors::MtpError;
use super::transport::{SessionHandle, TransportProvider};
use crate::ignore_poison::IgnorePoison;

/// Slot index plus the generation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    handle: Option<SessionHandle>,
}

/// Table of live transport sessions, indexed by `SessionKey`.
#[derive(Debug, Default)]
pub struct SessionArena {
    slots: Mutex<Vec<Slot>>,
}

impl SessionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a freshly opened handle, reusing a free slot when there is one.
    pub fn insert(&self, handle: SessionHandle) -> SessionKey {
        let mut slots = self.slots.lock_ignore_poison();
        if let Some(index) = slots.iter().position(|slot| slot.handle.is_none()) {
            let slot = &mut slots[index];
            slot.handle = Some(handle);
            return SessionKey {
                index,
                generation: slot.generation,
            };
        }
        slots.push(Slot {
            generation: 0,
            handle: Some(handle),
        });
        SessionKey {
            index: slots.len() - 1,
            generation: 0,
        }
    }

    /// Returns the handle if `key` still names a live session.
    pub fn resolve(&self, key: SessionKey) -> Option<SessionHandle> {
        let slots = self.slots.lock_ignore_poison();
        slots
            .get(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.handle)
    }

    /// Frees the slot and returns its handle. Only the first call for a key gets `Some`.
    pub fn remove(&self, key: SessionKey) -> Option<SessionHandle> {
        let mut slots = self.slots.lock_ignore_poison();
        let slot = slots.get_mut(key.index)?;
        if slot.generation != key.generation {
            return None;
        }
        let handle = slot.handle.take()?;
        slot.generation += 1;
        Some(handle)
    }

    /// Number of sessions currently open through this arena.
    pub fn live_count(&self) -> usize {
        self.slots
            .lock_ignore_poison()
            .iter()
            .filter(|slot| slot.handle.is_some())
            .count()
    }
}

/// Non-owning reference from a storage or node back to its session.
#[derive(Clone)]
pub struct SessionLink {
    transport: Arc<dyn TransportProvider>,
    arena: Arc<SessionArena>,
    key: SessionKey,
}

impl fmt::Debug for SessionLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLink").field("key", &self.key).finish_non_exhaustive()
    }
}

impl SessionLink {
    pub(crate) fn new(transport: Arc<dyn TransportProvider>, arena: Arc<SessionArena>, key: SessionKey) -> Self {
        Self { transport, arena, key }
    }

    pub(crate) fn transport(&self) -> &dyn TransportProvider {
        self.transport.as_ref()
    }

    /// Resolves the live transport handle, or `StaleHandle` once the session is gone.
    pub(crate) fn session(&self) -> Result<SessionHandle, MtpError> {
        self.arena.resolve(self.key).ok_or(MtpError::StaleHandle)
    }

    pub fn is_alive(&self) -> bool {
        self.arena.resolve(self.key).is_some()
    }

    /// Text for a call that just failed on `session`.
    ///
    /// The transport's own message wins; `fallback` is used when it has none.
    pub(crate) fn failure_message(&self, session: SessionHandle, fallback: &str) -> String {
        self.transport
            .last_transport_error(session)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Releases the transport session. Returns false if it was already released.
    pub(crate) fn release(&self) -> bool {
        match self.arena.remove(self.key) {
            Some(handle) => {
                debug!("Releasing transport session {:?}", handle);
                self.transport.release(handle);
                true
            }
            None => false,
        }
    }
}
