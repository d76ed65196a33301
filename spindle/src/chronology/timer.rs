// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Timers: options, events, the session interface, and the user-facing
//! [`Timer`] handle. The state machine transitions live here; the ordered
//! deadline set that drives them lives in
//! [`chronology_struct`](super::chronology_struct).

use crate::chronology::chronology_struct::ChronologyInner;
use crate::error::{Error, Result};
use crate::reactor::strand::Strand;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// The kind of condition a timer event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TimerEventType {
    /// The scheduled deadline arrived.
    Deadline,
    /// A scheduled deadline was removed before firing.
    Cancelled,
    /// The timer was closed; no further events follow.
    Closed,
}

/// One announced timer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    id: i64,
    event_type: TimerEventType,
    /// The deadline for [`TimerEventType::Deadline`] events; the
    /// announcement-enqueue time otherwise.
    time: Duration,
}

impl TimerEvent {
    #[must_use]
    pub fn new(id: i64, event_type: TimerEventType, time: Duration) -> Self {
        Self {
            id,
            event_type,
            time,
        }
    }

    #[must_use]
    pub fn id(&self) -> i64 { self.id }

    #[must_use]
    pub fn event_type(&self) -> TimerEventType { self.event_type }

    #[must_use]
    pub fn time(&self) -> Duration { self.time }
}

/// Options a timer is created with. The event mask selects which of the
/// three event kinds are announced; masked events are computed but not
/// delivered.
#[derive(Debug, Clone, Default)]
pub struct TimerOptions {
    id: i64,
    one_shot: bool,
    handle: usize,
    strand: Option<Arc<Strand>>,
    show_deadline: bool,
    show_cancelled: bool,
    show_closed: bool,
}

impl TimerOptions {
    /// Creates options with every event hidden; callers opt in with
    /// [`TimerOptions::show_event`].
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// One-shot timers close automatically after their first deadline.
    #[must_use]
    pub fn with_one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = one_shot;
        self
    }

    /// Attaches an opaque user value retrievable via [`Timer::handle`].
    #[must_use]
    pub fn with_handle(mut self, handle: usize) -> Self {
        self.handle = handle;
        self
    }

    /// Serializes this timer's events on `strand`.
    #[must_use]
    pub fn with_strand(mut self, strand: Arc<Strand>) -> Self {
        self.strand = Some(strand);
        self
    }

    pub fn show_event(&mut self, event_type: TimerEventType) -> &mut Self {
        match event_type {
            TimerEventType::Deadline => self.show_deadline = true,
            TimerEventType::Cancelled => self.show_cancelled = true,
            TimerEventType::Closed => self.show_closed = true,
        }
        self
    }

    pub fn hide_event(&mut self, event_type: TimerEventType) -> &mut Self {
        match event_type {
            TimerEventType::Deadline => self.show_deadline = false,
            TimerEventType::Cancelled => self.show_cancelled = false,
            TimerEventType::Closed => self.show_closed = false,
        }
        self
    }

    #[must_use]
    pub fn wants(&self, event_type: TimerEventType) -> bool {
        match event_type {
            TimerEventType::Deadline => self.show_deadline,
            TimerEventType::Cancelled => self.show_cancelled,
            TimerEventType::Closed => self.show_closed,
        }
    }

    #[must_use]
    pub fn id(&self) -> i64 { self.id }

    #[must_use]
    pub fn one_shot(&self) -> bool { self.one_shot }

    #[must_use]
    pub fn handle(&self) -> usize { self.handle }

    #[must_use]
    pub fn strand(&self) -> Option<&Arc<Strand>> { self.strand.as_ref() }
}

/// A higher-level object receiving timer events.
pub trait TimerSession: Send + Sync {
    fn process_deadline(&self, event: &TimerEvent);
    fn process_cancelled(&self, event: &TimerEvent);
    fn process_closed(&self, event: &TimerEvent);
}

/// Callback alternative to [`TimerSession`].
pub type TimerCallback = Arc<dyn Fn(&TimerEvent) + Send + Sync + 'static>;

/// Where a timer's events go.
#[derive(Clone)]
pub(crate) enum TimerTarget {
    Callback(TimerCallback),
    Session(Arc<dyn TimerSession>),
}

impl TimerTarget {
    pub(crate) fn dispatch(&self, event: &TimerEvent) {
        match self {
            TimerTarget::Callback(callback) => callback(event),
            TimerTarget::Session(session) => match event.event_type() {
                TimerEventType::Deadline => session.process_deadline(event),
                TimerEventType::Cancelled => session.process_cancelled(event),
                TimerEventType::Closed => session.process_closed(event),
            },
        }
    }
}

/// Lifecycle of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Created, no deadline pending.
    Unscheduled,
    /// A deadline is pending; recurring timers also carry a period.
    Scheduled,
    /// A non-recurring deadline fired; the timer lingers until closed.
    FiredAwaitingClose,
    /// Closed; schedule and cancel fail with
    /// [`Error::Invalid`](crate::Error::Invalid).
    Closed,
}

/// Scheduling fields guarded by the rep lock. The chronology's state lock
/// is always taken before a rep lock.
#[derive(Debug)]
pub(crate) struct TimerSched {
    pub(crate) state: TimerState,
    pub(crate) deadline: Option<Duration>,
    /// Zero-equivalent: `None` means non-recurring.
    pub(crate) period: Option<Duration>,
    /// Key under which this rep currently sits in the deadline set.
    pub(crate) key: Option<(Duration, u64)>,
}

/// The shared timer representation. Owned jointly by user [`Timer`] handles
/// and the chronology's deadline set / pending-event queue.
pub(crate) struct TimerRep {
    pub(crate) options: TimerOptions,
    pub(crate) target: TimerTarget,
    pub(crate) sched: Mutex<TimerSched>,
    pub(crate) chronology: Weak<ChronologyInner>,
}

impl std::fmt::Debug for TimerRep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRep")
            .field("id", &self.options.id())
            .field("one_shot", &self.options.one_shot())
            .finish_non_exhaustive()
    }
}

impl TimerRep {
    pub(crate) fn new(
        options: TimerOptions,
        target: TimerTarget,
        chronology: Weak<ChronologyInner>,
    ) -> Self {
        Self {
            options,
            target,
            sched: Mutex::new(TimerSched {
                state: TimerState::Unscheduled,
                deadline: None,
                period: None,
                key: None,
            }),
            chronology,
        }
    }

    pub(crate) fn lock_sched(&self) -> MutexGuard<'_, TimerSched> {
        match self.sched.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Delivers `event` directly or through the timer's strand.
    pub(crate) fn dispatch(self: &Arc<Self>, event: TimerEvent) {
        if let Some(strand) = self.options.strand() {
            let rep = self.clone();
            strand.post(Box::new(move || {
                rep.target.dispatch(&event);
            }));
        } else {
            self.target.dispatch(&event);
        }
    }
}

impl Drop for TimerRep {
    fn drop(&mut self) {
        if let Some(chronology) = self.chronology.upgrade() {
            chronology.deregister_timer();
        }
    }
}

/// A handle to a timer registered with a chronology.
///
/// Handles are cheap to clone; the timer stays registered while any handle,
/// scheduled deadline, or pending announcement references it.
#[derive(Debug, Clone)]
pub struct Timer {
    pub(crate) rep: Arc<TimerRep>,
}

impl Timer {
    /// Schedules the timer to fire at the absolute `deadline` on the
    /// chronology's clock, replacing any prior schedule atomically. A
    /// non-zero `period` makes the timer recurring.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] on a closed timer, or if the owning
    /// chronology is gone.
    pub fn schedule(
        &self,
        deadline: Duration,
        period: Option<Duration>,
    ) -> Result<()> {
        let chronology =
            self.rep.chronology.upgrade().ok_or(Error::Invalid)?;
        chronology.schedule_rep(&self.rep, deadline, period)
    }

    /// Removes the pending deadline, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when a scheduled deadline was removed
    /// before firing (the success signal of this operation), and
    /// [`Error::Invalid`] on a closed timer. `Ok(())` means there was
    /// nothing to cancel.
    pub fn cancel(&self) -> Result<()> {
        let chronology =
            self.rep.chronology.upgrade().ok_or(Error::Invalid)?;
        chronology.cancel_rep(&self.rep)
    }

    /// Closes the timer: deschedules it, prevents rescheduling, and (when
    /// enabled) announces one final [`TimerEventType::Closed`] event after
    /// any pending [`TimerEventType::Cancelled`] event.
    pub fn close(&self) {
        if let Some(chronology) = self.rep.chronology.upgrade() {
            chronology.close_rep(&self.rep);
        }
    }

    #[must_use]
    pub fn id(&self) -> i64 { self.rep.options.id() }

    #[must_use]
    pub fn one_shot(&self) -> bool { self.rep.options.one_shot() }

    /// The opaque user value supplied at creation.
    #[must_use]
    pub fn handle(&self) -> usize { self.rep.options.handle() }

    /// The strand this timer's events serialize on, if any.
    #[must_use]
    pub fn strand(&self) -> Option<Arc<Strand>> {
        self.rep.options.strand().cloned()
    }

    /// The index of the waiter thread driving the owning reactor, or 0.
    #[must_use]
    pub fn thread_index(&self) -> usize {
        self.rep
            .chronology
            .upgrade()
            .map_or(0, |chronology| chronology.driver_thread_index())
    }

    /// The current absolute time on the owning chronology's clock.
    #[must_use]
    pub fn current_time(&self) -> Duration {
        self.rep
            .chronology
            .upgrade()
            .map_or(Duration::ZERO, |chronology| chronology.current_time())
    }

    #[must_use]
    pub fn state(&self) -> TimerState { self.rep.lock_sched().state }
}
