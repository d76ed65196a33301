// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! The descriptor→entry catalog. The map lock is held only for O(1)
//! updates; per-entry mutation happens under the entry's own lock.

use crate::error::{Error, Result};
use crate::reactor::entry::RegistryEntry;
use crate::reactor::handle::Handle;
use crate::reactor::interest::Trigger;
use crate::reactor::session::{DetachCallback, ReactorSocket};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle→entry map with attach/lookup/detach orchestration.
pub struct Registry {
    map: Mutex<HashMap<Handle, Arc<RegistryEntry>>>,
    defaults: Mutex<(Trigger, bool)>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("size", &self.size()).finish()
    }
}

impl Default for Registry {
    fn default() -> Self { Self::new() }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            defaults: Mutex::new((Trigger::Level, false)),
        }
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<Handle, Arc<RegistryEntry>>> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn current_defaults(&self) -> (Trigger, bool) {
        match self.defaults.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sets the trigger mode newly attached entries start from.
    pub fn set_default_trigger(&self, trigger: Trigger) {
        if let Ok(mut guard) = self.defaults.lock() {
            guard.0 = trigger;
        }
    }

    /// Sets the one-shot mode newly attached entries start from.
    pub fn set_default_one_shot(&self, one_shot: bool) {
        if let Ok(mut guard) = self.defaults.lock() {
            guard.1 = one_shot;
        }
    }

    /// Creates an entry for `handle` with empty interest.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] if the handle is already attached and
    /// not yet fully detached.
    pub fn attach(&self, handle: Handle) -> Result<Arc<RegistryEntry>> {
        let (trigger, one_shot) = self.current_defaults();
        let mut map = self.lock_map();
        if map.contains_key(&handle) {
            return Err(Error::Invalid);
        }
        let entry = Arc::new(RegistryEntry::new(handle, trigger, one_shot));
        map.insert(handle, entry.clone());
        Ok(entry)
    }

    /// Creates an entry for a session-driven socket.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] if the session's handle is already
    /// attached.
    pub fn attach_socket(
        &self,
        session: Arc<dyn ReactorSocket>,
    ) -> Result<Arc<RegistryEntry>> {
        let (trigger, one_shot) = self.current_defaults();
        let handle = session.handle();
        let mut map = self.lock_map();
        if map.contains_key(&handle) {
            return Err(Error::Invalid);
        }
        let entry =
            Arc::new(RegistryEntry::with_session(session, trigger, one_shot));
        map.insert(handle, entry.clone());
        Ok(entry)
    }

    /// Returns the entry without marking processing.
    #[must_use]
    pub fn lookup(&self, handle: Handle) -> Option<Arc<RegistryEntry>> {
        self.lock_map().get(&handle).cloned()
    }

    /// Atomically returns the entry and increments its processing count.
    /// The driver calls this immediately before invoking a callback; a
    /// `None` result means a concurrent detach won and the event must be
    /// ignored.
    #[must_use]
    pub fn lookup_and_mark_processing(
        &self,
        handle: Handle,
    ) -> Option<Arc<RegistryEntry>> {
        let map = self.lock_map();
        let entry = map.get(&handle).cloned()?;
        entry.mark_processing();
        Some(entry)
    }

    /// Removes the entry from the map without detach bookkeeping. Used for
    /// auto-detach and controller teardown.
    pub fn remove(&self, handle: Handle) -> Option<Arc<RegistryEntry>> {
        self.lock_map().remove(&handle)
    }

    /// Removes the entry, records the detachment `callback`, and runs
    /// `remove_fn` (the OS-level removal). If no dispatch is in flight the
    /// detachment is announced synchronously; otherwise the last
    /// `decrement_processing` caller announces it. Returns whether the
    /// announcement happened synchronously.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] if the handle is not attached.
    pub fn remove_and_schedule_detach(
        &self,
        handle: Handle,
        callback: Option<DetachCallback>,
        remove_fn: impl FnOnce(&Arc<RegistryEntry>),
    ) -> Result<bool> {
        let entry = {
            let mut map = self.lock_map();
            map.remove(&handle).ok_or(Error::Invalid)?
        };
        entry.request_detach(callback);
        remove_fn(&entry);
        if !entry.is_processing() && entry.announce_detached() {
            entry.clear();
            return Ok(true);
        }
        Ok(false)
    }

    /// Drops every entry except `except_handle` (the controller) and
    /// invokes session close plus any pending detachment callbacks.
    /// Returns the removed entries so the driver can delete them from the
    /// OS event set.
    pub fn close_all(
        &self,
        except_handle: Handle,
    ) -> Vec<Arc<RegistryEntry>> {
        let removed: Vec<Arc<RegistryEntry>> = {
            let mut map = self.lock_map();
            let handles: Vec<Handle> = map
                .keys()
                .copied()
                .filter(|handle| *handle != except_handle)
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| map.remove(&handle))
                .collect()
        };
        for entry in &removed {
            entry.close();
            entry.announce_detached();
            entry.clear();
        }
        removed
    }

    /// The number of attached entries, controller included.
    #[must_use]
    pub fn size(&self) -> usize { self.lock_map().len() }
}
