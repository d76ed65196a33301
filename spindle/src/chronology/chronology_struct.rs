// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! The chronology: an ordered multiset of timer deadlines, a FIFO of
//! deferred functions, and the announcement loop that retires both.
//!
//! The chronology never blocks. It computes the duration that bounds the
//! driver's next OS wait ([`Chronology::timeout_interval`]) and retires due
//! work when a waiter calls [`Chronology::announce`]. Scheduling operations
//! interrupt the driver's waiters so the next wait recomputes its timeout.
//!
//! Locking: the chronology's state lock is taken before any timer's rep
//! lock, never the other way around, and neither is held across a user
//! callback.

use crate::chronology::clock::Clock;
use crate::chronology::timer::{Timer, TimerCallback, TimerEvent,
                               TimerEventType, TimerOptions, TimerRep,
                               TimerSession, TimerState, TimerTarget};
use crate::error::{Error, Result};
use crate::executor::{Executor, Functor, FunctorSequence};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::trace;

/// The driver a chronology wakes when its earliest deadline or deferred
/// queue changes. Implemented by the reactor; tests supply mocks.
pub trait ChronologyDriver: Send + Sync {
    /// Unblocks one caller blocked on the driver's OS wait.
    fn interrupt_one(&self);

    /// Unblocks every caller blocked on the driver's OS wait.
    fn interrupt_all(&self);

    /// The index of the principal waiter thread, or 0.
    fn thread_index(&self) -> usize { 0 }
}

/// Scheduling state guarded by the chronology's state lock.
struct SchedulerState {
    /// Deadline-ordered multiset; the `u64` is a stable insertion tiebreak
    /// so equal deadlines fire in insertion order.
    scheduled: BTreeMap<(Duration, u64), Arc<TimerRep>>,
    /// Cancel/close announcements waiting for the next cycle, FIFO.
    pending: VecDeque<(Arc<TimerRep>, TimerEvent)>,
    /// Deferred functions, FIFO.
    deferred: VecDeque<Functor>,
    next_seq: u64,
}

/// Shared chronology internals. Timer reps hold a weak reference back here
/// so user handles can schedule and cancel without going through the
/// [`Chronology`] wrapper.
pub(crate) struct ChronologyInner {
    clock: Arc<dyn Clock>,
    driver: Option<Weak<dyn ChronologyDriver>>,
    state: Mutex<SchedulerState>,
    /// Timers created and not yet destroyed, for `close_all`.
    registered_reps: Mutex<Vec<Weak<TimerRep>>>,
    num_registered: AtomicUsize,
    max_timers_per_announce: AtomicUsize,
}

impl ChronologyInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn current_time(&self) -> Duration {
        self.clock.current_time()
    }

    pub(crate) fn driver_thread_index(&self) -> usize {
        self.driver
            .as_ref()
            .and_then(Weak::upgrade)
            .map_or(0, |driver| driver.thread_index())
    }

    fn interrupt_driver_all(&self) {
        if let Some(driver) =
            self.driver.as_ref().and_then(Weak::upgrade)
        {
            driver.interrupt_all();
        }
    }

    pub(crate) fn deregister_timer(&self) {
        self.num_registered.fetch_sub(1, Ordering::SeqCst);
    }

    /// Schedules `rep` at `deadline`, replacing any prior schedule
    /// atomically. `period` of zero (or `None`) means non-recurring.
    pub(crate) fn schedule_rep(
        &self,
        rep: &Arc<TimerRep>,
        deadline: Duration,
        period: Option<Duration>,
    ) -> Result<()> {
        {
            let mut state = self.lock_state();
            let mut sched = rep.lock_sched();
            if sched.state == TimerState::Closed {
                return Err(Error::Invalid);
            }
            if let Some(key) = sched.key.take() {
                state.scheduled.remove(&key);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let key = (deadline, seq);
            state.scheduled.insert(key, rep.clone());
            sched.state = TimerState::Scheduled;
            sched.deadline = Some(deadline);
            sched.period = period.filter(|period| !period.is_zero());
            sched.key = Some(key);
            trace!(
                "Timer {} scheduled at {:?} period {:?}",
                rep.options.id(),
                deadline,
                sched.period
            );
        }
        self.interrupt_driver_all();
        Ok(())
    }

    /// Removes the pending deadline if one exists. Returns
    /// `Err(Cancelled)` when a deadline was removed, `Ok(())` when there
    /// was nothing to cancel.
    pub(crate) fn cancel_rep(&self, rep: &Arc<TimerRep>) -> Result<()> {
        let descheduled_with_event = {
            let mut state = self.lock_state();
            let mut sched = rep.lock_sched();
            match sched.state {
                TimerState::Closed => return Err(Error::Invalid),
                TimerState::Scheduled => {
                    if let Some(key) = sched.key.take() {
                        state.scheduled.remove(&key);
                    }
                    sched.state = TimerState::Unscheduled;
                    sched.deadline = None;
                    sched.period = None;
                    let wants_event =
                        rep.options.wants(TimerEventType::Cancelled);
                    if wants_event {
                        let event = TimerEvent::new(
                            rep.options.id(),
                            TimerEventType::Cancelled,
                            self.clock.current_time(),
                        );
                        state.pending.push_back((rep.clone(), event));
                    }
                    Some(wants_event)
                }
                TimerState::Unscheduled
                | TimerState::FiredAwaitingClose => None,
            }
        };
        match descheduled_with_event {
            Some(wants_event) => {
                trace!("Timer {} cancelled", rep.options.id());
                if wants_event {
                    self.interrupt_driver_all();
                }
                Err(Error::Cancelled)
            }
            None => Ok(()),
        }
    }

    /// Transitions `rep` to closed, descheduling it and (when enabled)
    /// queueing one final closed event behind any pending cancelled event.
    pub(crate) fn close_rep(&self, rep: &Arc<TimerRep>) {
        let announced = {
            let mut state = self.lock_state();
            let mut sched = rep.lock_sched();
            if sched.state == TimerState::Closed {
                return;
            }
            if let Some(key) = sched.key.take() {
                state.scheduled.remove(&key);
            }
            sched.state = TimerState::Closed;
            sched.deadline = None;
            sched.period = None;
            if rep.options.wants(TimerEventType::Closed) {
                let event = TimerEvent::new(
                    rep.options.id(),
                    TimerEventType::Closed,
                    self.clock.current_time(),
                );
                state.pending.push_back((rep.clone(), event));
                true
            } else {
                false
            }
        };
        trace!("Timer {} closed", rep.options.id());
        if announced {
            self.interrupt_driver_all();
        }
    }
}

/// The timer scheduler plus deferred-function queue.
///
/// Cheap to clone; all clones share one scheduler. See the
/// [module docs](self) for the locking discipline and
/// [`Chronology::announce`] for the retirement algorithm.
#[derive(Clone)]
pub struct Chronology {
    inner: Arc<ChronologyInner>,
    /// Timers created through this chronology are delegated here when set.
    parent: Option<Arc<Chronology>>,
}

impl std::fmt::Debug for Chronology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronology")
            .field("num_scheduled", &self.num_scheduled())
            .field("num_deferred", &self.num_deferred())
            .field("num_registered", &self.num_registered())
            .finish()
    }
}

impl Chronology {
    /// Creates a chronology with no driver to interrupt; scheduling still
    /// works, announcements simply rely on the caller to poll.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::build(None, clock)
    }

    /// Creates a chronology that interrupts `driver`'s waiters whenever
    /// its earliest deadline or deferred queue changes.
    #[must_use]
    pub fn with_driver(
        driver: Weak<dyn ChronologyDriver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::build(Some(driver), clock)
    }

    fn build(
        driver: Option<Weak<dyn ChronologyDriver>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ChronologyInner {
                clock,
                driver,
                state: Mutex::new(SchedulerState {
                    scheduled: BTreeMap::new(),
                    pending: VecDeque::new(),
                    deferred: VecDeque::new(),
                    next_seq: 0,
                }),
                registered_reps: Mutex::new(Vec::new()),
                num_registered: AtomicUsize::new(0),
                max_timers_per_announce: AtomicUsize::new(
                    crate::reactor::config::DEFAULT_MAX_TIMERS_PER_WAIT,
                ),
            }),
            parent: None,
        }
    }

    /// Installs a parent chronology. Timers created afterwards are
    /// registered with the parent (hierarchical scheduling); this
    /// chronology's own queues keep serving already-created timers.
    pub fn set_parent(&mut self, parent: Arc<Chronology>) {
        self.parent = Some(parent);
    }

    /// Caps the number of timers retired per [`Chronology::announce`]
    /// cycle.
    pub fn set_max_timers_per_announce(&self, max_timers: usize) {
        self.inner
            .max_timers_per_announce
            .store(max_timers.max(1), Ordering::SeqCst);
    }

    /// The current absolute time on this chronology's clock.
    #[must_use]
    pub fn current_time(&self) -> Duration { self.inner.current_time() }

    fn register_rep(&self, rep: &Arc<TimerRep>) {
        self.inner.num_registered.fetch_add(1, Ordering::SeqCst);
        let mut reps = match self.inner.registered_reps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Compact dead weak references once they dominate the list.
        if reps.len() > 16 && reps.len() > 2 * self.num_registered() {
            reps.retain(|weak| weak.strong_count() > 0);
        }
        reps.push(Arc::downgrade(rep));
    }

    fn create_timer_rep(
        &self,
        options: TimerOptions,
        target: TimerTarget,
    ) -> Timer {
        let rep = Arc::new(TimerRep::new(
            options,
            target,
            Arc::downgrade(&self.inner),
        ));
        self.register_rep(&rep);
        Timer { rep }
    }

    /// Creates a timer that invokes `callback` for each announced event.
    #[must_use]
    pub fn create_timer(
        &self,
        options: TimerOptions,
        callback: TimerCallback,
    ) -> Timer {
        if let Some(parent) = &self.parent {
            return parent.create_timer(options, callback);
        }
        self.create_timer_rep(options, TimerTarget::Callback(callback))
    }

    /// Creates a timer that invokes `session` for each announced event.
    #[must_use]
    pub fn create_timer_with_session(
        &self,
        options: TimerOptions,
        session: Arc<dyn TimerSession>,
    ) -> Timer {
        if let Some(parent) = &self.parent {
            return parent.create_timer_with_session(options, session);
        }
        self.create_timer_rep(options, TimerTarget::Session(session))
    }

    /// Runs one announcement cycle: pending cancel/close events first,
    /// then timers due at the current time (earliest first, stable for
    /// equal deadlines, capped per cycle), then the deferred functions
    /// enqueued so far. Work scheduled from within a callback lands in the
    /// next cycle.
    pub fn announce(&self) {
        self.announce_pending();
        self.announce_due_timers();
        self.announce_deferred();
    }

    fn announce_pending(&self) {
        let pending: Vec<(Arc<TimerRep>, TimerEvent)> = {
            let mut state = self.inner.lock_state();
            state.pending.drain(..).collect()
        };
        for (rep, event) in pending {
            rep.dispatch(event);
        }
    }

    fn announce_due_timers(&self) {
        let now = self.inner.current_time();
        let max_timers =
            self.inner.max_timers_per_announce.load(Ordering::SeqCst);

        // Snapshot the due batch under the lock; reinsertions from this
        // cycle (recurring catch-up, callback reschedules) become due no
        // earlier than the next cycle.
        let due: Vec<Arc<TimerRep>> = {
            let mut state = self.inner.lock_state();
            let mut due = Vec::new();
            while due.len() < max_timers {
                let Some((&key, _)) = state.scheduled.first_key_value()
                else {
                    break;
                };
                if key.0 > now {
                    break;
                }
                if let Some(rep) = state.scheduled.remove(&key) {
                    due.push(rep);
                }
            }
            due
        };

        for rep in due {
            self.announce_one_timer(&rep, now);
        }
    }

    fn announce_one_timer(&self, rep: &Arc<TimerRep>, now: Duration) {
        // Pre-dispatch transition: the rep left the deadline set above.
        let (fired_deadline, deadline_event) = {
            let mut sched = rep.lock_sched();
            sched.key = None;
            let fired_deadline =
                sched.deadline.unwrap_or(now);
            if sched.period.is_none() || rep.options.one_shot() {
                sched.state = TimerState::FiredAwaitingClose;
                sched.deadline = None;
                sched.period = None;
            }
            let event = rep
                .options
                .wants(TimerEventType::Deadline)
                .then(|| {
                    TimerEvent::new(
                        rep.options.id(),
                        TimerEventType::Deadline,
                        fired_deadline,
                    )
                });
            (fired_deadline, event)
        };

        if let Some(event) = deadline_event {
            trace!("Timer {} deadline announced", rep.options.id());
            rep.dispatch(event);
        }

        if rep.options.one_shot() {
            self.close_after_fire(rep);
        } else {
            self.reschedule_recurring(rep, fired_deadline, now);
        }
    }

    /// One-shot timers close automatically after their first deadline. A
    /// callback that rescheduled the timer during dispatch wins over the
    /// automatic close.
    fn close_after_fire(&self, rep: &Arc<TimerRep>) {
        let closed_event = {
            let mut sched = rep.lock_sched();
            if sched.state != TimerState::FiredAwaitingClose {
                return;
            }
            sched.state = TimerState::Closed;
            rep.options.wants(TimerEventType::Closed).then(|| {
                TimerEvent::new(
                    rep.options.id(),
                    TimerEventType::Closed,
                    self.inner.current_time(),
                )
            })
        };
        if let Some(event) = closed_event {
            rep.dispatch(event);
        }
    }

    /// Reinserts a recurring timer after its deadline fired. When several
    /// full periods have elapsed, the next deadline collapses to just past
    /// `now`: one backlog catch-up event per announce cycle, never one per
    /// missed period.
    fn reschedule_recurring(
        &self,
        rep: &Arc<TimerRep>,
        fired_deadline: Duration,
        now: Duration,
    ) {
        let mut state = self.inner.lock_state();
        let mut sched = rep.lock_sched();
        // A callback may have cancelled, closed, or rescheduled the timer
        // during dispatch; each of those owns the schedule now.
        if sched.state != TimerState::Scheduled || sched.key.is_some() {
            return;
        }
        let Some(period) = sched.period else {
            return;
        };
        let mut next = fired_deadline + period;
        if next <= now {
            next = now + Duration::from_nanos(1);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let key = (next, seq);
        state.scheduled.insert(key, rep.clone());
        sched.deadline = Some(next);
        sched.key = Some(key);
    }

    fn announce_deferred(&self) {
        let batch: VecDeque<Functor> = {
            let mut state = self.inner.lock_state();
            std::mem::take(&mut state.deferred)
        };
        for functor in batch {
            functor();
        }
    }

    /// Runs deferred functions until the queue is empty, including
    /// functions enqueued by the drained functions themselves.
    pub fn drain(&self) {
        loop {
            let batch: VecDeque<Functor> = {
                let mut state = self.inner.lock_state();
                std::mem::take(&mut state.deferred)
            };
            if batch.is_empty() {
                break;
            }
            for functor in batch {
                functor();
            }
        }
    }

    /// Discards all deferred functions without running them.
    pub fn clear_functions(&self) {
        self.inner.lock_state().deferred.clear();
    }

    /// Deschedules every timer and drops pending announcements. The
    /// timers themselves stay registered and may be rescheduled.
    pub fn clear_timers(&self) {
        let mut state = self.inner.lock_state();
        let scheduled = std::mem::take(&mut state.scheduled);
        for rep in scheduled.values() {
            let mut sched = rep.lock_sched();
            sched.state = TimerState::Unscheduled;
            sched.deadline = None;
            sched.period = None;
            sched.key = None;
        }
        state.pending.clear();
    }

    /// Discards all deferred functions and deschedules every timer.
    pub fn clear(&self) {
        self.clear_functions();
        self.clear_timers();
    }

    /// Closes every registered timer, announcing closed events where
    /// enabled.
    pub fn close_all(&self) {
        let reps: Vec<Arc<TimerRep>> = {
            let reps = match self.inner.registered_reps.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            reps.iter().filter_map(Weak::upgrade).collect()
        };
        for rep in reps {
            self.inner.close_rep(&rep);
        }
    }

    /// The earliest scheduled deadline, or `None` when nothing is
    /// scheduled.
    #[must_use]
    pub fn earliest(&self) -> Option<Duration> {
        self.inner
            .lock_state()
            .scheduled
            .first_key_value()
            .map(|(key, _)| key.0)
    }

    /// The duration until the earliest due work: zero when deferred
    /// functions or pending announcements await, the clamped distance to
    /// the earliest deadline otherwise, `None` when there is no work.
    #[must_use]
    pub fn timeout_interval(&self) -> Option<Duration> {
        let earliest = {
            let state = self.inner.lock_state();
            if !state.deferred.is_empty() || !state.pending.is_empty() {
                return Some(Duration::ZERO);
            }
            state.scheduled.first_key_value().map(|(key, _)| key.0)?
        };
        let now = self.inner.current_time();
        Some(earliest.saturating_sub(now))
    }

    #[must_use]
    pub fn num_scheduled(&self) -> usize {
        self.inner.lock_state().scheduled.len()
    }

    #[must_use]
    pub fn num_deferred(&self) -> usize {
        self.inner.lock_state().deferred.len()
    }

    /// Timers created and not yet destroyed.
    #[must_use]
    pub fn num_registered(&self) -> usize {
        self.inner.num_registered.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_any_scheduled(&self) -> bool { self.num_scheduled() > 0 }

    #[must_use]
    pub fn has_any_deferred(&self) -> bool {
        let state = self.inner.lock_state();
        !state.deferred.is_empty() || !state.pending.is_empty()
    }

    #[must_use]
    pub fn has_any_scheduled_or_deferred(&self) -> bool {
        let state = self.inner.lock_state();
        !state.scheduled.is_empty()
            || !state.deferred.is_empty()
            || !state.pending.is_empty()
    }

    #[must_use]
    pub fn has_any_registered(&self) -> bool { self.num_registered() > 0 }

    /// Loads all scheduled timers into `out`, earliest deadline first.
    pub fn load(&self, out: &mut Vec<Timer>) {
        let state = self.inner.lock_state();
        out.extend(
            state
                .scheduled
                .values()
                .map(|rep| Timer { rep: rep.clone() }),
        );
    }

}

impl Executor for Chronology {
    fn execute(&self, functor: Functor) {
        self.inner.lock_state().deferred.push_back(functor);
        self.inner.interrupt_driver_all();
    }

    fn move_and_execute(
        &self,
        sequence: &mut FunctorSequence,
        functor: Functor,
    ) {
        {
            let mut state = self.inner.lock_state();
            state.deferred.append(sequence);
            state.deferred.push_back(functor);
        }
        self.inner.interrupt_driver_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ONE_SECOND: Duration = Duration::from_secs(1);
    const ONE_MINUTE: Duration = Duration::from_secs(60);
    const ONE_HOUR: Duration = Duration::from_secs(3600);

    /// A clock the test advances by hand.
    struct TestClock {
        now: Mutex<Duration>,
    }

    impl TestClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Duration::from_secs(1_000)),
            })
        }

        fn advance(&self, elapsed: Duration) {
            *self.now.lock().unwrap() += elapsed;
        }
    }

    impl Clock for TestClock {
        fn current_time(&self) -> Duration { *self.now.lock().unwrap() }
    }

    /// Counts the interrupts a chronology sends its driver.
    #[derive(Default)]
    struct DriverMock {
        interrupt_one_calls: AtomicUsize,
        interrupt_all_calls: AtomicUsize,
    }

    impl ChronologyDriver for DriverMock {
        fn interrupt_one(&self) {
            self.interrupt_one_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn interrupt_all(&self) {
            self.interrupt_all_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn thread_index(&self) -> usize { 3 }
    }

    impl DriverMock {
        fn validate_interrupt_all_called(&self) {
            assert!(
                self.interrupt_all_calls.swap(0, Ordering::SeqCst) > 0,
                "expected the chronology to interrupt all waiters"
            );
        }
    }

    /// Records announced events in order.
    #[derive(Default)]
    struct EventRecorder {
        events: Mutex<Vec<TimerEvent>>,
    }

    impl EventRecorder {
        fn callback(self: &Arc<Self>) -> TimerCallback {
            let recorder = self.clone();
            Arc::new(move |event: &TimerEvent| {
                recorder.events.lock().unwrap().push(*event);
            })
        }

        fn validate_event_received(
            &self,
            id: i64,
            event_type: TimerEventType,
        ) {
            let mut events = self.events.lock().unwrap();
            assert!(
                !events.is_empty(),
                "expected ({id}, {event_type}) but no event was announced"
            );
            let event = events.remove(0);
            assert_eq!(event.id(), id);
            assert_eq!(event.event_type(), event_type);
        }

        fn validate_no_event_received(&self) {
            let events = self.events.lock().unwrap();
            assert!(
                events.is_empty(),
                "expected no events, got {events:?}"
            );
        }
    }

    /// The chronology test fixture: hand-driven clock, counting driver,
    /// recording callback.
    struct Suite {
        clock: Arc<TestClock>,
        driver: Arc<DriverMock>,
        chronology: Chronology,
        recorder: Arc<EventRecorder>,
    }

    impl Suite {
        fn new() -> Self {
            let clock = TestClock::new();
            let driver = Arc::new(DriverMock::default());
            let chronology = Chronology::with_driver(
                Arc::downgrade(&driver) as Weak<dyn ChronologyDriver>,
                clock.clone(),
            );
            Self {
                clock,
                driver,
                chronology,
                recorder: Arc::new(EventRecorder::default()),
            }
        }

        fn options(&self, id: i64) -> TimerOptions {
            TimerOptions::new().with_id(id)
        }

        fn deadline_options(&self, id: i64) -> TimerOptions {
            let mut options = self.options(id);
            options.show_event(TimerEventType::Deadline);
            options
        }

        fn now(&self) -> Duration { self.chronology.current_time() }

        fn validate_counts(&self, registered: usize, scheduled: usize) {
            assert_eq!(self.chronology.num_registered(), registered);
            assert_eq!(self.chronology.num_scheduled(), scheduled);
        }
    }

    #[test]
    fn test_timer_accessors() {
        let suite = Suite::new();
        let options = suite
            .options(17)
            .with_one_shot(true)
            .with_handle(0xBEEF);
        let timer =
            suite.chronology.create_timer(options, suite.recorder.callback());

        assert_eq!(timer.id(), 17);
        assert!(timer.one_shot());
        assert_eq!(timer.handle(), 0xBEEF);
        assert!(timer.strand().is_none());
        assert_eq!(timer.thread_index(), 3);
        assert_eq!(timer.state(), TimerState::Unscheduled);
    }

    #[test]
    fn test_current_time_follows_the_clock() {
        let suite = Suite::new();
        let start = suite.now();

        suite.clock.advance(ONE_SECOND);
        assert_eq!(suite.now(), start + ONE_SECOND);

        suite.clock.advance(ONE_HOUR);
        assert_eq!(suite.now(), start + ONE_SECOND + ONE_HOUR);
    }

    #[test]
    fn test_registered_and_scheduled_lifecycle() {
        let suite = Suite::new();
        {
            let timer = suite.chronology.create_timer(
                suite.deadline_options(1).with_one_shot(true),
                suite.recorder.callback(),
            );
            assert!(suite.chronology.has_any_registered());
            assert!(!suite.chronology.has_any_scheduled());

            timer.schedule(suite.now(), None).unwrap();
            suite.driver.validate_interrupt_all_called();
            assert!(suite.chronology.has_any_scheduled());

            suite.chronology.announce();
            suite
                .recorder
                .validate_event_received(1, TimerEventType::Deadline);
            assert!(!suite.chronology.has_any_scheduled());
        }
        // The handle is gone and the one-shot closed: nothing registered.
        assert!(!suite.chronology.has_any_registered());
    }

    #[test]
    fn test_earliest_and_timeout_interval() {
        let suite = Suite::new();
        assert_eq!(suite.chronology.earliest(), None);
        assert_eq!(suite.chronology.timeout_interval(), None);

        let timer_late = suite.chronology.create_timer(
            suite.deadline_options(0).with_one_shot(true),
            suite.recorder.callback(),
        );
        timer_late.schedule(suite.now() + ONE_HOUR, None).unwrap();
        suite.driver.validate_interrupt_all_called();
        suite.validate_counts(1, 1);
        assert_eq!(
            suite.chronology.earliest(),
            Some(suite.now() + ONE_HOUR)
        );
        assert_eq!(suite.chronology.timeout_interval(), Some(ONE_HOUR));

        suite.clock.advance(ONE_SECOND);
        suite.chronology.announce();
        assert_eq!(
            suite.chronology.timeout_interval(),
            Some(ONE_HOUR - ONE_SECOND)
        );

        let timer_early = suite.chronology.create_timer(
            suite.deadline_options(1).with_one_shot(true),
            suite.recorder.callback(),
        );
        timer_early.schedule(suite.now() + ONE_MINUTE, None).unwrap();
        suite.validate_counts(2, 2);
        assert_eq!(
            suite.chronology.earliest(),
            Some(suite.now() + ONE_MINUTE)
        );
        assert_eq!(suite.chronology.timeout_interval(), Some(ONE_MINUTE));

        suite.chronology.close_all();
    }

    #[test]
    fn test_due_deadline_means_zero_timeout() {
        let suite = Suite::new();
        let timer = suite.chronology.create_timer(
            suite.deadline_options(0),
            suite.recorder.callback(),
        );
        timer.schedule(suite.now(), None).unwrap();
        assert_eq!(
            suite.chronology.timeout_interval(),
            Some(Duration::ZERO)
        );
        timer.close();
    }

    #[test]
    fn test_clear_functions_discards_deferred_work() {
        let suite = Suite::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut sequence = crate::executor::FunctorSequence::new();
        for _ in 0..3 {
            let counter = counter.clone();
            sequence.push_back(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as crate::executor::Functor);
        }
        let counter_last = counter.clone();
        suite.chronology.move_and_execute(
            &mut sequence,
            Box::new(move || {
                counter_last.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(suite.chronology.num_deferred(), 4);
        suite.driver.validate_interrupt_all_called();

        suite.chronology.clear_functions();
        suite.chronology.announce();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drain_runs_everything() {
        let suite = Suite::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = counter.clone();
            suite.chronology.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(suite.chronology.num_deferred(), 4);

        suite.chronology.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(!suite.chronology.has_any_deferred());
    }

    #[test]
    fn test_drain_includes_nested_deferred_work() {
        let suite = Suite::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let chronology = suite.chronology.clone();
        let counter_outer = counter.clone();
        suite.chronology.execute(Box::new(move || {
            let counter_inner = counter_outer.clone();
            counter_outer.fetch_add(1, Ordering::SeqCst);
            chronology.execute(Box::new(move || {
                counter_inner.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        suite.chronology.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_single_one_shot_timer_at_now() {
        let suite = Suite::new();
        {
            let timer = suite.chronology.create_timer(
                suite.deadline_options(0).with_one_shot(true),
                suite.recorder.callback(),
            );
            timer.schedule(suite.now(), None).unwrap();

            suite.chronology.announce();
            suite
                .recorder
                .validate_event_received(0, TimerEventType::Deadline);
            suite.recorder.validate_no_event_received();
            assert_eq!(timer.state(), TimerState::Closed);
        }
        assert_eq!(suite.chronology.num_registered(), 0);
    }

    #[test]
    fn test_three_ordered_timers() {
        let suite = Suite::new();
        let mut timers = Vec::new();
        for id in 0..3 {
            let timer = suite.chronology.create_timer(
                suite.deadline_options(id).with_one_shot(true),
                suite.recorder.callback(),
            );
            timer
                .schedule(
                    suite.now() + ONE_HOUR * (id as u32 + 1),
                    None,
                )
                .unwrap();
            timers.push(timer);
        }

        suite.clock.advance(ONE_HOUR);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();

        suite.clock.advance(ONE_HOUR);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(1, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();

        suite.clock.advance(ONE_HOUR);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(2, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let suite = Suite::new();
        let deadline = suite.now() + ONE_MINUTE;
        let timers: Vec<Timer> = (0..4)
            .map(|id| {
                let timer = suite.chronology.create_timer(
                    suite.deadline_options(id).with_one_shot(true),
                    suite.recorder.callback(),
                );
                timer.schedule(deadline, None).unwrap();
                timer
            })
            .collect();
        drop(timers);

        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        for id in 0..4 {
            suite
                .recorder
                .validate_event_received(id, TimerEventType::Deadline);
        }
    }

    #[test]
    fn test_recurring_timer_cadence() {
        let suite = Suite::new();
        let timer = suite.chronology.create_timer(
            suite.deadline_options(5),
            suite.recorder.callback(),
        );
        timer
            .schedule(suite.now() + ONE_HOUR, Some(ONE_MINUTE))
            .unwrap();
        suite.driver.validate_interrupt_all_called();
        suite.validate_counts(1, 1);

        // Before the first deadline nothing fires.
        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite.recorder.validate_no_event_received();

        // At the deadline the timer fires and stays scheduled.
        suite.clock.advance(ONE_HOUR - ONE_MINUTE);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(5, TimerEventType::Deadline);
        suite.validate_counts(1, 1);

        // And again one period later.
        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(5, TimerEventType::Deadline);

        timer.close();
    }

    #[test]
    fn test_recurring_backlog_collapses_to_one_catch_up() {
        let suite = Suite::new();
        let timer = suite.chronology.create_timer(
            suite.deadline_options(0),
            suite.recorder.callback(),
        );
        timer
            .schedule(suite.now() + ONE_HOUR, Some(ONE_MINUTE))
            .unwrap();

        suite.clock.advance(ONE_HOUR);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);

        // Four full periods elapse: they collapse into one event.
        suite.clock.advance(ONE_MINUTE * 4);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();

        // One catch-up event drains the backlog.
        suite.clock.advance(ONE_SECOND);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);

        // Caught up: the next period has not elapsed yet.
        suite.clock.advance(ONE_SECOND);
        suite.chronology.announce();
        suite.recorder.validate_no_event_received();

        timer.close();
    }

    #[test]
    fn test_cancel_before_due() {
        let suite = Suite::new();
        let mut options = suite.options(0);
        options
            .show_event(TimerEventType::Deadline)
            .show_event(TimerEventType::Cancelled);
        let timer = suite
            .chronology
            .create_timer(options, suite.recorder.callback());
        timer.schedule(suite.now() + ONE_HOUR, None).unwrap();

        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite.recorder.validate_no_event_received();

        assert!(matches!(timer.cancel(), Err(Error::Cancelled)));
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Cancelled);

        // Cancelling produced no deadline for that scheduling.
        suite.clock.advance(ONE_HOUR);
        suite.chronology.announce();
        suite.recorder.validate_no_event_received();
    }

    #[test]
    fn test_cancel_without_schedule_has_no_effect() {
        let suite = Suite::new();
        let mut options = suite.options(0);
        options.show_event(TimerEventType::Cancelled);
        let timer = suite
            .chronology
            .create_timer(options, suite.recorder.callback());

        assert!(timer.cancel().is_ok());
        suite.chronology.announce();
        suite.recorder.validate_no_event_received();
    }

    #[test]
    fn test_closed_timer_rejects_schedule_and_cancel() {
        let suite = Suite::new();
        let timer = suite.chronology.create_timer(
            suite.deadline_options(0),
            suite.recorder.callback(),
        );
        timer.close();

        assert!(matches!(
            timer.schedule(suite.now(), None),
            Err(Error::Invalid)
        ));
        assert!(matches!(timer.cancel(), Err(Error::Invalid)));
        assert_eq!(timer.state(), TimerState::Closed);
    }

    #[test]
    fn test_close_recurring_between_periods() {
        let suite = Suite::new();
        let mut options = suite.options(0);
        options
            .show_event(TimerEventType::Deadline)
            .show_event(TimerEventType::Closed);
        let timer = suite
            .chronology
            .create_timer(options, suite.recorder.callback());
        timer
            .schedule(suite.now() + ONE_HOUR, Some(ONE_MINUTE))
            .unwrap();

        suite.clock.advance(ONE_HOUR);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);

        // Close between a deadline and its next period.
        suite.clock.advance(ONE_SECOND);
        suite.chronology.announce();
        suite.recorder.validate_no_event_received();
        timer.close();
        suite.driver.validate_interrupt_all_called();
        suite.validate_counts(1, 0);

        // No further deadline, a single closed event.
        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Closed);
        suite.recorder.validate_no_event_received();
    }

    #[test]
    fn test_non_recurring_timer_awaits_close() {
        let suite = Suite::new();
        let mut options = suite.options(0);
        options
            .show_event(TimerEventType::Deadline)
            .show_event(TimerEventType::Closed);
        let timer = suite
            .chronology
            .create_timer(options, suite.recorder.callback());
        timer.schedule(suite.now(), None).unwrap();

        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);
        assert_eq!(timer.state(), TimerState::FiredAwaitingClose);

        // Still reschedulable after firing.
        timer.schedule(suite.now() + ONE_MINUTE, None).unwrap();
        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);

        timer.close();
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Closed);
    }

    #[test]
    fn test_cancelled_then_closed_event_order() {
        let suite = Suite::new();
        let mut options = suite.options(0);
        options
            .show_event(TimerEventType::Cancelled)
            .show_event(TimerEventType::Closed);
        let timer = suite
            .chronology
            .create_timer(options, suite.recorder.callback());
        timer.schedule(suite.now() + ONE_HOUR, None).unwrap();

        assert!(matches!(timer.cancel(), Err(Error::Cancelled)));
        timer.close();

        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Cancelled);
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Closed);
        suite.recorder.validate_no_event_received();
    }

    #[test]
    fn test_deferred_functions_run_after_timers_in_fifo_order() {
        let suite = Suite::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let timer = suite.chronology.create_timer(
            suite.deadline_options(0).with_one_shot(true),
            {
                let log = log.clone();
                Arc::new(move |_event: &TimerEvent| {
                    log.lock().unwrap().push("timer");
                })
            },
        );
        timer.schedule(suite.now(), None).unwrap();

        for label in ["first", "second"] {
            let log = log.clone();
            suite.chronology.execute(Box::new(move || {
                log.lock().unwrap().push(label);
            }));
        }

        suite.chronology.announce();
        assert_eq!(*log.lock().unwrap(), vec!["timer", "first", "second"]);
    }

    #[test]
    fn test_work_scheduled_by_callbacks_lands_in_the_next_cycle() {
        let suite = Suite::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let chronology = suite.chronology.clone();
        let log_outer = log.clone();
        suite.chronology.execute(Box::new(move || {
            log_outer.lock().unwrap().push("outer");
            let log_inner = log_outer.clone();
            chronology.execute(Box::new(move || {
                log_inner.lock().unwrap().push("inner");
            }));
        }));

        suite.chronology.announce();
        assert_eq!(*log.lock().unwrap(), vec!["outer"]);

        suite.chronology.announce();
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_reschedule_replaces_prior_schedule() {
        let suite = Suite::new();
        let timer = suite.chronology.create_timer(
            suite.deadline_options(0).with_one_shot(true),
            suite.recorder.callback(),
        );
        timer.schedule(suite.now() + ONE_HOUR, None).unwrap();
        timer.schedule(suite.now() + ONE_MINUTE, None).unwrap();
        suite.validate_counts(1, 1);

        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();
    }

    #[test]
    fn test_max_timers_per_announce_caps_one_cycle() {
        let suite = Suite::new();
        suite.chronology.set_max_timers_per_announce(2);

        let timers: Vec<Timer> = (0..5)
            .map(|id| {
                let timer = suite.chronology.create_timer(
                    suite.deadline_options(id).with_one_shot(true),
                    suite.recorder.callback(),
                );
                timer.schedule(suite.now(), None).unwrap();
                timer
            })
            .collect();

        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);
        suite
            .recorder
            .validate_event_received(1, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();
        assert_eq!(suite.chronology.num_scheduled(), 3);

        suite.chronology.announce();
        suite.chronology.announce();
        assert_eq!(suite.chronology.num_scheduled(), 0);
        drop(timers);
    }

    #[test]
    fn test_load_returns_timers_in_deadline_order() {
        let suite = Suite::new();
        let late = suite.chronology.create_timer(
            suite.deadline_options(2),
            suite.recorder.callback(),
        );
        late.schedule(suite.now() + ONE_HOUR, None).unwrap();
        let early = suite.chronology.create_timer(
            suite.deadline_options(1),
            suite.recorder.callback(),
        );
        early.schedule(suite.now() + ONE_MINUTE, None).unwrap();

        let mut loaded = Vec::new();
        suite.chronology.load(&mut loaded);
        let ids: Vec<i64> = loaded.iter().map(Timer::id).collect();
        assert_eq!(ids, vec![1, 2]);

        suite.chronology.close_all();
    }

    #[test]
    fn test_session_timers_route_by_event_kind() {
        #[derive(Default)]
        struct RecordingSession {
            log: Mutex<Vec<&'static str>>,
        }

        impl TimerSession for RecordingSession {
            fn process_deadline(&self, _event: &TimerEvent) {
                self.log.lock().unwrap().push("deadline");
            }

            fn process_cancelled(&self, _event: &TimerEvent) {
                self.log.lock().unwrap().push("cancelled");
            }

            fn process_closed(&self, _event: &TimerEvent) {
                self.log.lock().unwrap().push("closed");
            }
        }

        let suite = Suite::new();
        let session = Arc::new(RecordingSession::default());
        let mut options = suite.options(0);
        options
            .show_event(TimerEventType::Deadline)
            .show_event(TimerEventType::Closed);
        let timer = suite
            .chronology
            .create_timer_with_session(options, session.clone());

        timer.schedule(suite.now(), None).unwrap();
        suite.chronology.announce();
        timer.close();
        suite.chronology.announce();

        assert_eq!(*session.log.lock().unwrap(), vec!["deadline", "closed"]);
    }

    #[test]
    fn test_close_all_closes_unscheduled_timers_too() {
        let suite = Suite::new();
        let mut options = suite.options(0);
        options.show_event(TimerEventType::Closed);
        let timer = suite
            .chronology
            .create_timer(options, suite.recorder.callback());

        suite.chronology.close_all();
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Closed);
        assert_eq!(timer.state(), TimerState::Closed);
    }

    #[test]
    fn test_clear_timers_deschedules_without_closing() {
        let suite = Suite::new();
        let timer = suite.chronology.create_timer(
            suite.deadline_options(0),
            suite.recorder.callback(),
        );
        timer.schedule(suite.now(), None).unwrap();

        suite.chronology.clear_timers();
        assert_eq!(suite.chronology.num_scheduled(), 0);
        suite.chronology.announce();
        suite.recorder.validate_no_event_received();

        // Cleared timers may be scheduled again.
        timer.schedule(suite.now(), None).unwrap();
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(0, TimerEventType::Deadline);
    }

    #[test]
    fn test_mixed_one_shot_and_recurring() {
        let suite = Suite::new();
        let one_shot = suite.chronology.create_timer(
            suite.deadline_options(1).with_one_shot(true),
            suite.recorder.callback(),
        );
        one_shot.schedule(suite.now() + ONE_MINUTE, None).unwrap();

        let recurring = suite.chronology.create_timer(
            suite.deadline_options(2),
            suite.recorder.callback(),
        );
        recurring
            .schedule(suite.now() + ONE_MINUTE * 2, Some(ONE_MINUTE * 2))
            .unwrap();

        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(1, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();

        suite.clock.advance(ONE_MINUTE);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(2, TimerEventType::Deadline);

        suite.clock.advance(ONE_MINUTE * 2);
        suite.chronology.announce();
        suite
            .recorder
            .validate_event_received(2, TimerEventType::Deadline);
        suite.recorder.validate_no_event_received();

        recurring.close();
    }
}

