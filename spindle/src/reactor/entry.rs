// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! One registry entry per attached handle: interest, dispatch targets, the
//! processing counter, and detach orchestration.

use crate::reactor::event::{NotificationQueue, ReactorEvent};
use crate::reactor::handle::Handle;
use crate::reactor::interest::{EventOptions, Interest, Trigger};
use crate::reactor::session::{DetachCallback, EventCallback,
                              NotificationCallback, ReactorSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mutable state guarded by the entry lock: interest plus dispatch targets.
#[derive(Default)]
struct EntryInner {
    interest: Interest,
    session: Option<Arc<dyn ReactorSocket>>,
    readable: Option<EventCallback>,
    writable: Option<EventCallback>,
    error: Option<EventCallback>,
    notifications: Option<NotificationCallback>,
}

/// The reactor's per-descriptor record.
///
/// Owned by the registry; the driver holds non-owning references guarded by
/// the processing counter. The counter is incremented while the driver is
/// invoking a callback for this entry and decremented on return; the
/// detachment callback fires exactly once, only after the counter reaches
/// zero with a detach pending.
pub struct RegistryEntry {
    handle: Handle,
    inner: Mutex<EntryInner>,
    processing: AtomicUsize,
    detach_pending: AtomicBool,
    detach: Mutex<Option<DetachCallback>>,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("handle", &self.handle)
            .field("processing", &self.processing.load(Ordering::SeqCst))
            .field(
                "detach_pending",
                &self.detach_pending.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}

impl RegistryEntry {
    /// Creates an entry with empty interest seeded from the registry
    /// defaults.
    #[must_use]
    pub fn new(handle: Handle, trigger: Trigger, one_shot: bool) -> Self {
        Self {
            handle,
            inner: Mutex::new(EntryInner {
                interest: Interest::new(trigger, one_shot),
                ..EntryInner::default()
            }),
            processing: AtomicUsize::new(0),
            detach_pending: AtomicBool::new(false),
            detach: Mutex::new(None),
        }
    }

    /// Creates an entry driven by a [`ReactorSocket`] session.
    #[must_use]
    pub fn with_session(
        session: Arc<dyn ReactorSocket>,
        trigger: Trigger,
        one_shot: bool,
    ) -> Self {
        let handle = session.handle();
        let entry = Self::new(handle, trigger, one_shot);
        entry.lock_inner().session = Some(session);
        entry
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, EntryInner> {
        // Entry locks are leaf locks; a poisoned entry means a user callback
        // panicked mid-update, and the interest state is still coherent.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle { self.handle }

    #[must_use]
    pub fn interest(&self) -> Interest { self.lock_inner().interest }

    #[must_use]
    pub fn one_shot(&self) -> bool { self.lock_inner().interest.one_shot() }

    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn ReactorSocket>> {
        self.lock_inner().session.clone()
    }

    // Interest transitions. Each returns the updated interest so the
    // driver can push it to the OS event set in the same operation.

    pub fn show_readable(&self, options: EventOptions) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_readable(options);
        inner.interest
    }

    pub fn show_readable_callback(
        &self,
        options: EventOptions,
        callback: EventCallback,
    ) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_readable(options);
        inner.readable = Some(callback);
        inner.interest
    }

    pub fn show_writable(&self, options: EventOptions) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_writable(options);
        inner.interest
    }

    pub fn show_writable_callback(
        &self,
        options: EventOptions,
        callback: EventCallback,
    ) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_writable(options);
        inner.writable = Some(callback);
        inner.interest
    }

    pub fn show_error(&self, options: EventOptions) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_error(options);
        inner.interest
    }

    pub fn show_error_callback(
        &self,
        options: EventOptions,
        callback: EventCallback,
    ) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_error(options);
        inner.error = Some(callback);
        inner.interest
    }

    pub fn show_notifications(&self) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_notifications();
        inner.interest
    }

    pub fn show_notifications_callback(
        &self,
        callback: NotificationCallback,
    ) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.show_notifications();
        inner.notifications = Some(callback);
        inner.interest
    }

    pub fn hide_readable(&self) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.hide_readable();
        inner.interest
    }

    pub fn hide_writable(&self) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.hide_writable();
        inner.interest
    }

    pub fn hide_error(&self) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.hide_error();
        inner.interest
    }

    pub fn hide_notifications(&self) -> Interest {
        let mut inner = self.lock_inner();
        inner.interest.hide_notifications();
        inner.interest
    }

    // Dispatch. Targets are cloned out of the lock before invocation so a
    // callback may re-register interest on its own descriptor.

    /// Dispatches a readable event. Returns true if a target ran.
    ///
    /// The kernel already filtered delivery by the registered interest;
    /// interest changes made mid-cycle take effect on the next cycle, so
    /// only the presence of a target gates dispatch here.
    pub fn announce_readable(&self, event: &ReactorEvent) -> bool {
        let (session, callback) = {
            let inner = self.lock_inner();
            (inner.session.clone(), inner.readable.clone())
        };
        if let Some(session) = session {
            session.process_readable(event);
            true
        } else if let Some(callback) = callback {
            callback(event);
            true
        } else {
            false
        }
    }

    /// Dispatches a writable event. Returns true if a target ran.
    pub fn announce_writable(&self, event: &ReactorEvent) -> bool {
        let (session, callback) = {
            let inner = self.lock_inner();
            (inner.session.clone(), inner.writable.clone())
        };
        if let Some(session) = session {
            session.process_writable(event);
            true
        } else if let Some(callback) = callback {
            callback(event);
            true
        } else {
            false
        }
    }

    /// Dispatches an error event. Returns true if a target ran.
    pub fn announce_error(&self, event: &ReactorEvent) -> bool {
        let (session, callback) = {
            let inner = self.lock_inner();
            (inner.session.clone(), inner.error.clone())
        };
        if let Some(session) = session {
            session.process_error(event);
            true
        } else if let Some(callback) = callback {
            callback(event);
            true
        } else {
            false
        }
    }

    /// Dispatches a drained notification batch. Returns true if a target
    /// ran.
    pub fn announce_notifications(&self, queue: &NotificationQueue) -> bool {
        let (session, callback) = {
            let inner = self.lock_inner();
            if !inner.interest.want_notifications() {
                return false;
            }
            (inner.session.clone(), inner.notifications.clone())
        };
        if let Some(session) = session {
            session.process_notifications(queue);
            true
        } else if let Some(callback) = callback {
            callback(queue);
            true
        } else {
            false
        }
    }

    /// After a one-shot delivery the kernel has disarmed the descriptor;
    /// mirror that in the recorded interest so re-arming requires an
    /// explicit `show_*`. The driver calls this once per entry per poll
    /// cycle, after all events for the entry have been dispatched, so a
    /// combined readable+writable report delivers both before disarming.
    pub fn consume_one_shot_interest(&self) {
        let mut inner = self.lock_inner();
        if inner.interest.one_shot() {
            inner.interest.hide_readable();
            inner.interest.hide_writable();
        }
    }

    // Processing counter and detach orchestration.

    /// Marks a dispatch in flight. Called by the registry with its lock
    /// held, immediately before the driver invokes callbacks.
    pub fn mark_processing(&self) {
        self.processing.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst) > 0
    }

    #[must_use]
    pub fn processing_count(&self) -> usize {
        self.processing.load(Ordering::SeqCst)
    }

    /// Ends a dispatch. Returns true when the count reached zero and a
    /// detach is pending; the caller must then run
    /// [`RegistryEntry::announce_detached`].
    pub fn decrement_processing(&self) -> bool {
        let previous = self.processing.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "processing counter underflow");
        previous == 1 && self.detach_pending.load(Ordering::SeqCst)
    }

    /// Records that this entry has been removed and must announce
    /// detachment once idle. The pending flag is published before any
    /// processing-count check so the decrement path cannot miss it.
    pub fn request_detach(&self, callback: Option<DetachCallback>) {
        {
            let mut guard = match self.detach.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = callback;
        }
        self.detach_pending.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn detach_required(&self) -> bool {
        self.detach_pending.load(Ordering::SeqCst)
    }

    /// Runs the pending detachment callback, if any remains. The take()
    /// under the lock makes the callback fire exactly once no matter how
    /// many paths race here. Returns true if a detach was pending.
    pub fn announce_detached(&self) -> bool {
        if !self.detach_pending.load(Ordering::SeqCst) {
            return false;
        }
        let callback = {
            let mut guard = match self.detach.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        self.detach_pending.store(false, Ordering::SeqCst);
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Drops dispatch targets to break reference cycles with sessions.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.session = None;
        inner.readable = None;
        inner.writable = None;
        inner.error = None;
        inner.notifications = None;
    }

    /// Shuts the session down, for `close_all`.
    pub fn close(&self) {
        let session = self.lock_inner().session.clone();
        if let Some(session) = session {
            session.close();
        }
    }
}
