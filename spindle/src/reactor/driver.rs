// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

// cspell:words EINTR epoll eventfd

//! The reactor driver: readiness multiplexing over the OS event set, the
//! waiter registry, and the dispatch loop tying the registry and the
//! chronology together.
//!
//! One reactor may be driven by a single thread (the fast paths skip
//! controller writes for in-thread wakes) or by a pool of waiter threads up
//! to `max_threads`; above one thread, one-shot delivery is the default so
//! no two waiters dispatch the same event.

use crate::chronology::chronology_struct::{Chronology, ChronologyDriver};
use crate::chronology::clock::{Clock, MonotonicClock};
use crate::chronology::timer::{Timer, TimerCallback, TimerOptions,
                               TimerSession};
use crate::error::{Error, Result};
use crate::executor::{Executor, Functor, FunctorSequence};
use crate::reactor::config::{LoadBalancingOptions, ReactorConfig,
                             WaiterOptions};
use crate::reactor::controller::Controller;
use crate::reactor::entry::RegistryEntry;
use crate::reactor::epoll_set::{self, EpollSet, PolledEvent};
use crate::reactor::event::{NotificationQueue, ReactorEvent,
                            ReactorEventType};
use crate::reactor::handle::{Handle, INVALID_HANDLE};
use crate::reactor::interest::{EventOptions, Trigger};
use crate::reactor::metrics::{ReactorMetrics, ReactorMetricsSnapshot};
use crate::reactor::registry::Registry;
use crate::reactor::session::{DetachCallback, EventCallback,
                              NotificationCallback, ReactorSocket};
use crate::reactor::strand::Strand;
use crate::reactor::user::{ConnectionLimiter, User};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize,
                        Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{trace, warn};

/// A thread enrolled to drive a reactor. Obtained from
/// [`Reactor::register_waiter`]; the enrolling thread passes it back to
/// [`Reactor::run`] or [`Reactor::poll`].
pub struct Waiter {
    context: Arc<WaiterContext>,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("thread", &self.context.thread)
            .finish_non_exhaustive()
    }
}

impl Waiter {
    /// This waiter's metrics, when per-waiter collection is enabled.
    #[must_use]
    pub fn metrics(&self) -> Option<ReactorMetricsSnapshot> {
        self.context
            .metrics
            .as_ref()
            .map(|metrics| metrics.snapshot())
    }
}

struct WaiterContext {
    #[allow(dead_code)]
    options: WaiterOptions,
    thread: ThreadId,
    metrics: Option<Arc<ReactorMetrics>>,
    /// Per-waiter reusable poll batch.
    results: Mutex<Vec<PolledEvent>>,
}

struct ReactorInner {
    config: ReactorConfig,
    epoll: EpollSet,
    registry: Registry,
    chronology: Chronology,
    controller: Mutex<Option<Arc<Controller>>>,
    controller_handle: AtomicI32,
    metrics: Arc<ReactorMetrics>,
    connection_limiter: Option<Arc<dyn ConnectionLimiter>>,
    waiters: Mutex<Vec<Arc<WaiterContext>>>,
    principal_thread: Mutex<Option<ThreadId>>,
    thread_index: AtomicUsize,
    load: AtomicU64,
    run: AtomicBool,
    /// True when more than one waiter thread may drive this reactor.
    dynamic: bool,
}

impl ChronologyDriver for ReactorInner {
    fn interrupt_one(&self) { self.interrupt_one(); }

    fn interrupt_all(&self) { self.interrupt_all(); }

    fn thread_index(&self) -> usize {
        self.thread_index.load(Ordering::SeqCst)
    }
}

impl Executor for ReactorInner {
    fn execute(&self, functor: Functor) { self.chronology.execute(functor); }

    fn move_and_execute(
        &self,
        sequence: &mut FunctorSequence,
        functor: Functor,
    ) {
        self.chronology.move_and_execute(sequence, functor);
    }
}

impl ReactorInner {
    fn lock_waiters(&self) -> MutexGuard<'_, Vec<Arc<WaiterContext>>> {
        match self.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_controller(&self) -> MutexGuard<'_, Option<Arc<Controller>>> {
        match self.controller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn current_controller(&self) -> Option<Arc<Controller>> {
        self.lock_controller().clone()
    }

    fn controller_handle(&self) -> Handle {
        self.controller_handle.load(Ordering::SeqCst)
    }

    /// True when the calling thread is the principal waiter; in-thread
    /// interrupts are then unnecessary because the loop re-evaluates its
    /// timeout before the next wait.
    fn is_waiter(&self) -> bool {
        let current = std::thread::current().id();
        match self.principal_thread.lock() {
            Ok(guard) => *guard == Some(current),
            Err(poisoned) => *poisoned.into_inner() == Some(current),
        }
    }

    fn interrupt_one(&self) {
        if self.is_waiter() {
            return;
        }
        self.metrics.update_interrupt();
        if let Some(controller) = self.current_controller() {
            if controller.interrupt(1).is_err() {
                self.reinitialize_control_logged();
            }
        }
    }

    fn interrupt_all(&self) {
        if !self.dynamic {
            self.interrupt_one();
            return;
        }
        let num_waiters = self.lock_waiters().len() as u64;
        if num_waiters == 0 {
            return;
        }
        self.metrics.update_interrupt();
        if let Some(controller) = self.current_controller() {
            if controller.interrupt(num_waiters).is_err() {
                self.reinitialize_control_logged();
            }
        }
    }

    /// Recreates the controller descriptor and re-registers it readable.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the replacement controller
    /// cannot be created or registered.
    fn reinitialize_control(&self) -> Result<()> {
        {
            let mut guard = self.lock_controller();
            if let Some(old) = guard.take() {
                if let Some(entry) = self.registry.remove(old.handle()) {
                    let _ = self.epoll.remove(entry.handle());
                    entry.clear();
                }
            }
        }

        let controller = Controller::new()?;
        let entry = self.registry.attach(controller.handle())?;
        let interest = entry.show_readable(EventOptions::new());
        self.epoll.add(controller.handle(), interest)?;
        self.controller_handle
            .store(controller.handle(), Ordering::SeqCst);
        *self.lock_controller() = Some(Arc::new(controller));
        Ok(())
    }

    fn reinitialize_control_logged(&self) {
        if let Err(error) = self.reinitialize_control() {
            warn!("Failed to reinitialize reactor controller: {error}");
        }
    }

    fn deinitialize_control(&self) {
        let mut guard = self.lock_controller();
        if let Some(controller) = guard.take() {
            if let Some(entry) = self.registry.remove(controller.handle()) {
                let _ = self.epoll.remove(entry.handle());
                entry.clear();
            }
        }
        self.controller_handle.store(INVALID_HANDLE, Ordering::SeqCst);
    }

    fn validate_options(&self, options: &EventOptions) -> Result<()> {
        if let Some(trigger) = options.trigger {
            if !self.supports_trigger(trigger) {
                return Err(Error::NotSupported);
            }
        }
        if let Some(true) = options.one_shot {
            if !self.supports_one_shot(true) {
                return Err(Error::NotSupported);
            }
        }
        Ok(())
    }

    fn supports_one_shot(&self, _one_shot: bool) -> bool { true }

    fn supports_trigger(&self, _trigger: Trigger) -> bool { true }

    /// Shared tail of every `show_*`: update the OS set for a known entry,
    /// or attach implicitly when configured to.
    fn show_common(
        &self,
        handle: Handle,
        lookup_applied: Option<crate::reactor::interest::Interest>,
        attach_and_apply: impl FnOnce(
            &Arc<RegistryEntry>,
        )
            -> crate::reactor::interest::Interest,
    ) -> Result<()> {
        if let Some(interest) = lookup_applied {
            return self.epoll.update(handle, interest);
        }
        if self.config.auto_attach != Some(true) {
            return Err(Error::Invalid);
        }
        let entry = self.registry.attach(handle)?;
        let interest = attach_and_apply(&entry);
        self.epoll.add(handle, interest)
    }

    /// Shared tail of every `hide_*`: push the reduced interest, or drop
    /// the entry entirely under auto-detach once no I/O interest remains.
    fn hide_common(
        &self,
        handle: Handle,
        interest: crate::reactor::interest::Interest,
    ) -> Result<()> {
        if self.config.auto_detach != Some(true)
            || interest.want_readable_or_writable()
        {
            return self.epoll.update(handle, interest);
        }
        self.registry.remove(handle);
        self.epoll.remove(handle)
    }

    fn detach(
        &self,
        handle: Handle,
        callback: Option<DetachCallback>,
    ) -> Result<()> {
        let announced = self.registry.remove_and_schedule_detach(
            handle,
            callback,
            |entry| {
                let _ = self.epoll.remove(entry.handle());
            },
        )?;
        if announced {
            self.interrupt_one();
        }
        Ok(())
    }

    fn num_sockets(&self) -> usize {
        // The controller occupies one registry slot.
        self.registry.size().saturating_sub(1)
    }

    fn timeout_ms(&self) -> i32 {
        match self.chronology.timeout_interval() {
            None => -1,
            Some(interval) if interval.is_zero() => 0,
            Some(interval) => {
                // Round up so a deadline is never waited past.
                let nanos = interval.as_nanos();
                let millis = nanos.div_ceil(1_000_000);
                millis.min(i32::MAX as u128) as i32
            }
        }
    }

    /// One iteration: one OS wait, dispatch of the polled batch, then up
    /// to `max_cycles_per_wait` chronology cycles.
    fn poll_once(&self, waiter: &WaiterContext) {
        let timeout_ms = self.timeout_ms();
        if timeout_ms < 0 {
            trace!("Polling for socket events indefinitely");
        } else {
            trace!(
                "Polling for socket events or until {timeout_ms} \
                 milliseconds have elapsed"
            );
        }

        let max_events = self
            .config
            .max_events_per_wait
            .unwrap_or(crate::reactor::config::DEFAULT_MAX_EVENTS_PER_WAIT);

        let mut results = match waiter.results.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let wait_result = if timeout_ms == 0 && self.num_sockets() == 0 {
            Ok(0)
        } else {
            self.epoll.wait(&mut results, max_events, timeout_ms)
        };

        let metrics = waiter.metrics.as_deref().unwrap_or(&self.metrics);

        match wait_result {
            Ok(count) if count > 0 => {
                let mut num_readable: u64 = 0;
                let mut num_writable: u64 = 0;
                let mut num_errors: u64 = 0;
                let mut num_notifications: u64 = 0;
                let mut num_detachments: u64 = 0;

                for index in 0..count {
                    let polled = results[index];
                    self.dispatch_event(
                        polled,
                        &mut num_readable,
                        &mut num_writable,
                        &mut num_errors,
                        &mut num_notifications,
                        &mut num_detachments,
                    );
                }

                let num_total = num_readable
                    + num_writable
                    + num_errors
                    + num_notifications
                    + num_detachments;
                if num_total == 0 {
                    metrics.update_spurious_wakeup();
                    std::thread::yield_now();
                } else {
                    metrics.update_poll(
                        num_readable,
                        num_writable,
                        num_errors,
                        num_notifications,
                        num_detachments,
                    );
                }
            }
            Ok(_) => {
                trace!("Timed out polling for socket events");
                metrics.update_poll(0, 0, 0, 0, 0);
            }
            Err(source)
                if source.kind() == std::io::ErrorKind::Interrupted => {
                // A signal broke the wait; the loop simply re-evaluates.
            }
            Err(source) => {
                warn!("Failed to poll for socket events: {source}");
            }
        }
        drop(results);

        // Invoke functions deferred while processing each polled event and
        // process all expired timers.
        let mut num_cycles = self
            .config
            .max_cycles_per_wait
            .unwrap_or(crate::reactor::config::DEFAULT_MAX_CYCLES_PER_WAIT);
        while num_cycles != 0 {
            if self.chronology.has_any_scheduled_or_deferred() {
                self.chronology.announce();
                num_cycles -= 1;
            } else {
                break;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_event(
        &self,
        polled: PolledEvent,
        num_readable: &mut u64,
        num_writable: &mut u64,
        num_errors: &mut u64,
        num_notifications: &mut u64,
        num_detachments: &mut u64,
    ) {
        let handle = polled.handle;
        debug_assert_ne!(handle, INVALID_HANDLE);

        // A missing entry means a concurrent detach won; ignore the event.
        let Some(entry) = self.registry.lookup_and_mark_processing(handle)
        else {
            return;
        };
        debug_assert_eq!(entry.handle(), handle);

        if handle == self.controller_handle() {
            self.dispatch_controller_event(&entry, polled, num_readable);
        } else {
            self.dispatch_socket_event(
                &entry,
                polled,
                num_readable,
                num_writable,
                num_errors,
                num_notifications,
            );
        }

        if entry.decrement_processing() && entry.announce_detached() {
            entry.clear();
            *num_detachments += 1;
        }
    }

    fn dispatch_socket_event(
        &self,
        entry: &Arc<RegistryEntry>,
        polled: PolledEvent,
        num_readable: &mut u64,
        num_writable: &mut u64,
        num_errors: &mut u64,
        num_notifications: &mut u64,
    ) {
        let handle = polled.handle;
        let mut fatal_socket_error = false;

        if polled.is_error() {
            // A polled error is not necessarily fatal: notifications also
            // arrive through the error flag. Drain the error queue first;
            // only an actual socket error suppresses further dispatch.
            let last_error = match epoll_set::take_socket_error(handle) {
                Ok(last_error) => last_error,
                Err(_) => Some(Error::ConnectionDead),
            };
            match last_error {
                None => {
                    let mut queue = NotificationQueue::new(handle);
                    match epoll_set::receive_notifications(
                        &mut queue, handle,
                    ) {
                        Ok(()) => {
                            if entry.announce_notifications(&queue) {
                                *num_notifications += 1;
                            }
                        }
                        Err(error) => {
                            fatal_socket_error = true;
                            let event =
                                ReactorEvent::with_error(handle, error);
                            if entry.announce_error(&event) {
                                *num_errors += 1;
                            }
                        }
                    }
                }
                Some(error) => {
                    fatal_socket_error = true;
                    let event = ReactorEvent::with_error(handle, error);
                    if entry.announce_error(&event) {
                        *num_errors += 1;
                    }
                }
            }
        }

        if !fatal_socket_error {
            let deliver_io =
                polled.is_writable() || polled.is_readable_or_hangup();
            if deliver_io && entry.one_shot() {
                // The kernel disarmed the descriptor at delivery; record
                // it before dispatch so callbacks re-arm cleanly.
                entry.consume_one_shot_interest();
            }

            if polled.is_writable() {
                let event =
                    ReactorEvent::new(handle, ReactorEventType::Writable);
                if entry.announce_writable(&event) {
                    *num_writable += 1;
                }
            }

            if polled.is_readable_or_hangup() {
                let event =
                    ReactorEvent::new(handle, ReactorEventType::Readable);
                if entry.announce_readable(&event) {
                    *num_readable += 1;
                }
            }

            if polled.is_hangup_only() {
                // Artificially remove the descriptor; a later show_* may
                // re-add it to poll once more after both sides shut down.
                let _ = self.epoll.remove(handle);
            }
        }
    }

    fn dispatch_controller_event(
        &self,
        entry: &Arc<RegistryEntry>,
        polled: PolledEvent,
        num_readable: &mut u64,
    ) {
        if polled.is_error() {
            self.reinitialize_control_logged();
            return;
        }
        if !polled.is_readable_or_hangup() {
            return;
        }
        *num_readable += 1;
        let Some(controller) = self.current_controller() else {
            return;
        };
        if controller.acknowledge().is_err() {
            self.reinitialize_control_logged();
        } else if entry.one_shot() {
            let interest = entry.show_readable(EventOptions::new());
            let _ = self.epoll.update(entry.handle(), interest);
        }
    }

    /// Executes all pending jobs; called when the last waiter leaves.
    fn flush(&self) {
        if self.chronology.has_any_scheduled_or_deferred() {
            loop {
                self.chronology.announce();
                if !self.chronology.has_any_deferred() {
                    break;
                }
            }
        }
    }
}

impl Drop for ReactorInner {
    fn drop(&mut self) { self.deinitialize_control(); }
}

/// An event-driven I/O reactor multiplexing descriptor readiness, timer
/// deadlines, and deferred functions over `epoll`.
///
/// Cheap to clone; all clones drive one shared reactor. Threads enroll via
/// [`Reactor::register_waiter`] and then call [`Reactor::run`] (loop until
/// [`Reactor::stop`]) or [`Reactor::poll`] (exactly one iteration).
///
/// Callbacks run inline on the waiter thread that polled the event; they
/// must not block indefinitely.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("num_sockets", &self.num_sockets())
            .field("num_timers", &self.num_timers())
            .field("num_waiters", &self.num_waiters())
            .finish_non_exhaustive()
    }
}

impl Reactor {
    /// Creates a reactor with the production monotonic clock and no
    /// collaborators.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the epoll descriptor or the
    /// controller cannot be created.
    pub fn new(config: ReactorConfig) -> Result<Self> {
        Self::with_user_and_clock(config, None, MonotonicClock::shared())
    }

    /// Creates a reactor operating in the environment of `user` (shared
    /// metrics, connection limiter, parent chronology).
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the epoll descriptor or the
    /// controller cannot be created.
    pub fn with_user(
        config: ReactorConfig,
        user: Arc<dyn User>,
    ) -> Result<Self> {
        Self::with_user_and_clock(config, Some(user), MonotonicClock::shared())
    }

    /// Creates a reactor reading time from `clock`; tests inject manual
    /// clocks here.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the epoll descriptor or the
    /// controller cannot be created.
    pub fn with_clock(
        config: ReactorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::with_user_and_clock(config, None, clock)
    }

    fn with_user_and_clock(
        mut config: ReactorConfig,
        user: Option<Arc<dyn User>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.normalize();

        let epoll = EpollSet::new()?;
        let dynamic = config.max_threads.unwrap_or(1) > 1;
        let max_timers = config
            .max_timers_per_wait
            .unwrap_or(crate::reactor::config::DEFAULT_MAX_TIMERS_PER_WAIT);
        let default_trigger = config.trigger.unwrap_or_default();
        let default_one_shot = config.one_shot.unwrap_or(false);

        let metrics = user
            .as_ref()
            .and_then(|user| user.reactor_metrics())
            .unwrap_or_else(|| Arc::new(ReactorMetrics::new()));
        let connection_limiter =
            user.as_ref().and_then(|user| user.connection_limiter());
        let parent_chronology =
            user.as_ref().and_then(|user| user.chronology());

        let inner = Arc::new_cyclic(|weak: &Weak<ReactorInner>| {
            let mut chronology = Chronology::with_driver(
                weak.clone() as Weak<dyn ChronologyDriver>,
                clock,
            );
            chronology.set_max_timers_per_announce(max_timers);
            if let Some(parent) = parent_chronology {
                chronology.set_parent(parent);
            }
            ReactorInner {
                config,
                epoll,
                registry: Registry::new(),
                chronology,
                controller: Mutex::new(None),
                controller_handle: AtomicI32::new(INVALID_HANDLE),
                metrics,
                connection_limiter,
                waiters: Mutex::new(Vec::new()),
                principal_thread: Mutex::new(None),
                thread_index: AtomicUsize::new(0),
                load: AtomicU64::new(0),
                run: AtomicBool::new(true),
                dynamic,
            }
        });

        inner.registry.set_default_trigger(default_trigger);
        inner.registry.set_default_one_shot(default_one_shot);
        inner.reinitialize_control()?;

        Ok(Self { inner })
    }

    // Waiter registration and the event loop.

    /// Enrolls the calling thread as a driver of this reactor. The first
    /// waiter becomes the principal thread backing the in-thread interrupt
    /// fast path.
    #[must_use]
    pub fn register_waiter(&self, options: WaiterOptions) -> Waiter {
        let thread = std::thread::current().id();
        let metrics = if self.inner.config.metric_collection == Some(true)
            && self.inner.config.metric_collection_per_waiter == Some(true)
        {
            Some(Arc::new(ReactorMetrics::new()))
        } else {
            None
        };
        let context = Arc::new(WaiterContext {
            options,
            thread,
            metrics,
            results: Mutex::new(Vec::new()),
        });

        let mut waiters = self.inner.lock_waiters();
        if waiters.is_empty() {
            if let Ok(mut principal) = self.inner.principal_thread.lock() {
                *principal = Some(thread);
            }
            if let Some(index) = context.options.thread_index {
                self.inner.thread_index.store(index, Ordering::SeqCst);
            }
        }
        waiters.push(context.clone());
        Waiter { context }
    }

    /// Withdraws a waiter. When the last waiter leaves, remaining deferred
    /// work is flushed.
    pub fn deregister_waiter(&self, waiter: Waiter) {
        let now_empty = {
            let mut waiters = self.inner.lock_waiters();
            waiters
                .retain(|context| !Arc::ptr_eq(context, &waiter.context));
            waiters.is_empty()
        };
        if now_empty {
            if let Ok(mut principal) = self.inner.principal_thread.lock() {
                *principal = None;
            }
            self.inner.flush();
        }
    }

    /// Blocks the calling thread dispatching events until
    /// [`Reactor::stop`]. After `run` returns, [`Reactor::restart`] must
    /// be called before driving the reactor again.
    pub fn run(&self, waiter: &Waiter) {
        debug_assert_eq!(
            waiter.context.thread,
            std::thread::current().id(),
            "run must be called on the thread that registered the waiter"
        );
        while self.inner.run.load(Ordering::SeqCst) {
            self.inner.poll_once(&waiter.context);
        }
    }

    /// Executes exactly one iteration: one OS wait plus dispatch and
    /// chronology cycles.
    pub fn poll(&self, waiter: &Waiter) {
        debug_assert_eq!(
            waiter.context.thread,
            std::thread::current().id(),
            "poll must be called on the thread that registered the waiter"
        );
        self.inner.poll_once(&waiter.context);
    }

    /// Unblocks one caller blocked on [`Reactor::run`] or
    /// [`Reactor::poll`].
    pub fn interrupt_one(&self) { self.inner.interrupt_one(); }

    /// Unblocks every caller blocked on [`Reactor::run`] or
    /// [`Reactor::poll`].
    pub fn interrupt_all(&self) { self.inner.interrupt_all(); }

    /// Stops the run loops at their next iteration boundary and wakes all
    /// waiters.
    pub fn stop(&self) {
        self.inner.run.store(false, Ordering::SeqCst);
        self.inner.interrupt_all();
    }

    /// Prepares the reactor for [`Reactor::run`] after a stop.
    pub fn restart(&self) { self.inner.run.store(true, Ordering::SeqCst); }

    // Registration: attach, show, hide, detach.

    /// Starts monitoring `handle` with empty interest.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] when the handle is already attached,
    /// or with the OS error from the event-set update.
    pub fn attach(&self, handle: Handle) -> Result<()> {
        let entry = self.inner.registry.attach(handle)?;
        self.inner.epoll.add(handle, entry.interest())
    }

    /// Starts monitoring a session-driven socket with empty interest.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] when the handle is already attached,
    /// or with the OS error from the event-set update.
    pub fn attach_socket(
        &self,
        socket: Arc<dyn ReactorSocket>,
    ) -> Result<()> {
        let handle = socket.handle();
        let entry = self.inner.registry.attach_socket(socket)?;
        self.inner.epoll.add(handle, entry.interest())
    }

    /// Registers readable interest on `handle`, delivering events to
    /// `callback`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotSupported`] for options this backend cannot
    /// honor and [`Error::Invalid`] for an unknown handle without
    /// auto-attach.
    pub fn show_readable(
        &self,
        handle: Handle,
        options: EventOptions,
        callback: EventCallback,
    ) -> Result<()> {
        self.inner.validate_options(&options)?;
        let applied = self
            .inner
            .registry
            .lookup(handle)
            .map(|entry| {
                entry.show_readable_callback(options, callback.clone())
            });
        self.inner.show_common(handle, applied, |entry| {
            entry.show_readable_callback(options, callback)
        })
    }

    /// Registers readable interest for an attached session socket.
    ///
    /// # Errors
    ///
    /// Same contract as [`Reactor::show_readable`].
    pub fn show_readable_socket(
        &self,
        socket: &Arc<dyn ReactorSocket>,
        options: EventOptions,
    ) -> Result<()> {
        self.inner.validate_options(&options)?;
        let handle = socket.handle();
        let applied = self
            .inner
            .registry
            .lookup(handle)
            .map(|entry| entry.show_readable(options));
        if applied.is_none() && self.inner.config.auto_attach == Some(true)
        {
            let entry =
                self.inner.registry.attach_socket(socket.clone())?;
            let interest = entry.show_readable(options);
            return self.inner.epoll.add(handle, interest);
        }
        self.inner
            .show_common(handle, applied, |entry| entry.show_readable(options))
    }

    /// Registers writable interest on `handle`, delivering events to
    /// `callback`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Reactor::show_readable`].
    pub fn show_writable(
        &self,
        handle: Handle,
        options: EventOptions,
        callback: EventCallback,
    ) -> Result<()> {
        self.inner.validate_options(&options)?;
        let applied = self
            .inner
            .registry
            .lookup(handle)
            .map(|entry| {
                entry.show_writable_callback(options, callback.clone())
            });
        self.inner.show_common(handle, applied, |entry| {
            entry.show_writable_callback(options, callback)
        })
    }

    /// Registers writable interest for an attached session socket.
    ///
    /// # Errors
    ///
    /// Same contract as [`Reactor::show_readable`].
    pub fn show_writable_socket(
        &self,
        socket: &Arc<dyn ReactorSocket>,
        options: EventOptions,
    ) -> Result<()> {
        self.inner.validate_options(&options)?;
        let handle = socket.handle();
        let applied = self
            .inner
            .registry
            .lookup(handle)
            .map(|entry| entry.show_writable(options));
        if applied.is_none() && self.inner.config.auto_attach == Some(true)
        {
            let entry =
                self.inner.registry.attach_socket(socket.clone())?;
            let interest = entry.show_writable(options);
            return self.inner.epoll.add(handle, interest);
        }
        self.inner
            .show_common(handle, applied, |entry| entry.show_writable(options))
    }

    /// Registers error interest on `handle`, delivering events to
    /// `callback`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Reactor::show_readable`].
    pub fn show_error(
        &self,
        handle: Handle,
        options: EventOptions,
        callback: EventCallback,
    ) -> Result<()> {
        self.inner.validate_options(&options)?;
        let applied = self
            .inner
            .registry
            .lookup(handle)
            .map(|entry| {
                entry.show_error_callback(options, callback.clone())
            });
        self.inner.show_common(handle, applied, |entry| {
            entry.show_error_callback(options, callback)
        })
    }

    /// Registers notification interest on `handle`, delivering drained
    /// error-queue batches to `callback`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] for an unknown handle without
    /// auto-attach.
    pub fn show_notifications(
        &self,
        handle: Handle,
        callback: NotificationCallback,
    ) -> Result<()> {
        let applied = self
            .inner
            .registry
            .lookup(handle)
            .map(|entry| {
                entry.show_notifications_callback(callback.clone())
            });
        self.inner.show_common(handle, applied, |entry| {
            entry.show_notifications_callback(callback)
        })
    }

    /// Removes readable interest from `handle`; under auto-detach an
    /// entry left without I/O interest is detached as part of the same
    /// operation.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] for an unknown handle.
    pub fn hide_readable(&self, handle: Handle) -> Result<()> {
        let entry =
            self.inner.registry.lookup(handle).ok_or(Error::Invalid)?;
        let interest = entry.hide_readable();
        self.inner.hide_common(handle, interest)
    }

    /// Removes writable interest from `handle`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] for an unknown handle.
    pub fn hide_writable(&self, handle: Handle) -> Result<()> {
        let entry =
            self.inner.registry.lookup(handle).ok_or(Error::Invalid)?;
        let interest = entry.hide_writable();
        self.inner.hide_common(handle, interest)
    }

    /// Removes error interest from `handle`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] for an unknown handle.
    pub fn hide_error(&self, handle: Handle) -> Result<()> {
        let entry =
            self.inner.registry.lookup(handle).ok_or(Error::Invalid)?;
        let interest = entry.hide_error();
        self.inner.hide_common(handle, interest)
    }

    /// Removes notification interest from `handle`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] for an unknown handle.
    pub fn hide_notifications(&self, handle: Handle) -> Result<()> {
        let entry =
            self.inner.registry.lookup(handle).ok_or(Error::Invalid)?;
        let interest = entry.hide_notifications();
        self.inner.hide_common(handle, interest)
    }

    /// Stops monitoring `handle`. `callback`, when supplied, fires exactly
    /// once after the last in-flight dispatch for the entry returns;
    /// synchronously from this call when nothing is in flight.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] for an unknown handle.
    pub fn detach(
        &self,
        handle: Handle,
        callback: Option<DetachCallback>,
    ) -> Result<()> {
        self.inner.detach(handle, callback)
    }

    /// Stops monitoring a session socket; see [`Reactor::detach`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invalid`] for an unknown handle.
    pub fn detach_socket(
        &self,
        socket: &Arc<dyn ReactorSocket>,
        callback: Option<DetachCallback>,
    ) -> Result<()> {
        self.inner.detach(socket.handle(), callback)
    }

    /// Closes all monitored sockets and timers, announcing detachment and
    /// closed events where enabled.
    pub fn close_all(&self) {
        self.inner.chronology.close_all();
        let removed =
            self.inner.registry.close_all(self.inner.controller_handle());
        for entry in removed {
            let _ = self.inner.epoll.remove(entry.handle());
        }
    }

    // Timers, deferred functions, strands.

    /// Creates a timer announcing events to `callback`.
    #[must_use]
    pub fn create_timer(
        &self,
        options: TimerOptions,
        callback: TimerCallback,
    ) -> Timer {
        self.inner.chronology.create_timer(options, callback)
    }

    /// Creates a timer announcing events to `session`.
    #[must_use]
    pub fn create_timer_with_session(
        &self,
        options: TimerOptions,
        session: Arc<dyn TimerSession>,
    ) -> Timer {
        self.inner
            .chronology
            .create_timer_with_session(options, session)
    }

    /// Creates a strand sequencing arbitrary functions on this reactor's
    /// waiter threads.
    #[must_use]
    pub fn create_strand(&self) -> Arc<Strand> {
        Strand::new(self.inner.clone() as Arc<dyn Executor>)
    }

    /// The reactor's chronology, for introspection and direct scheduling.
    #[must_use]
    pub fn chronology(&self) -> &Chronology { &self.inner.chronology }

    /// Executes all deferred functions, including ones they enqueue.
    pub fn drain_functions(&self) { self.inner.chronology.drain(); }

    /// Discards all deferred functions without running them.
    pub fn clear_functions(&self) { self.inner.chronology.clear_functions(); }

    /// Deschedules all timers.
    pub fn clear_timers(&self) { self.inner.chronology.clear_timers(); }

    /// Drops all monitored sockets without announcing detachment beyond
    /// their recorded callbacks.
    pub fn clear_sockets(&self) {
        let removed =
            self.inner.registry.close_all(self.inner.controller_handle());
        for entry in removed {
            let _ = self.inner.epoll.remove(entry.handle());
        }
    }

    /// Clears all resources managed by this reactor.
    pub fn clear(&self) {
        self.inner.chronology.clear();
        self.clear_sockets();
    }

    // Load accounting and handle reservations.

    /// Takes one descriptor reservation from the configured connection
    /// limiter; always permitted when no limiter is installed.
    #[must_use]
    pub fn acquire_handle_reservation(&self) -> bool {
        match &self.inner.connection_limiter {
            Some(limiter) => limiter.acquire(),
            None => true,
        }
    }

    /// Returns one descriptor reservation to the configured connection
    /// limiter.
    pub fn release_handle_reservation(&self) {
        if let Some(limiter) = &self.inner.connection_limiter {
            limiter.release();
        }
    }

    /// Raises the load estimate according to `options`.
    pub fn increment_load(&self, options: LoadBalancingOptions) {
        let weight = options.weight.unwrap_or(1) as u64;
        self.inner.load.fetch_add(weight, Ordering::SeqCst);
    }

    /// Lowers the load estimate according to `options`.
    pub fn decrement_load(&self, options: LoadBalancingOptions) {
        let weight = options.weight.unwrap_or(1) as u64;
        self.inner.load.fetch_sub(weight, Ordering::SeqCst);
    }

    // Introspection.

    /// The number of descriptors currently monitored, controller excluded.
    #[must_use]
    pub fn num_sockets(&self) -> usize { self.inner.num_sockets() }

    /// The number of scheduled timers.
    #[must_use]
    pub fn num_timers(&self) -> usize {
        self.inner.chronology.num_scheduled()
    }

    /// The number of registered waiters.
    #[must_use]
    pub fn num_waiters(&self) -> usize { self.inner.lock_waiters().len() }

    /// The current load estimate.
    #[must_use]
    pub fn load(&self) -> u64 { self.inner.load.load(Ordering::SeqCst) }

    /// True when no deferred functions, timers, or sockets remain.
    #[must_use]
    pub fn empty(&self) -> bool {
        !self.inner.chronology.has_any_scheduled_or_deferred()
            && !self.inner.chronology.has_any_registered()
            && self.num_sockets() == 0
    }

    /// The index of the principal waiter thread in its pool, or 0.
    #[must_use]
    pub fn thread_index(&self) -> usize {
        self.inner.thread_index.load(Ordering::SeqCst)
    }

    /// The current absolute time on the reactor's clock.
    #[must_use]
    pub fn current_time(&self) -> Duration {
        self.inner.chronology.current_time()
    }

    #[must_use]
    pub fn min_threads(&self) -> usize {
        self.inner.config.min_threads.unwrap_or(1)
    }

    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.inner.config.max_threads.unwrap_or(1)
    }

    #[must_use]
    pub fn auto_attach(&self) -> bool {
        self.inner.config.auto_attach == Some(true)
    }

    #[must_use]
    pub fn auto_detach(&self) -> bool {
        self.inner.config.auto_detach == Some(true)
    }

    /// The default one-shot mode of event delivery.
    #[must_use]
    pub fn one_shot(&self) -> bool {
        self.inner.config.one_shot == Some(true)
    }

    /// The default trigger mode of event detection.
    #[must_use]
    pub fn trigger(&self) -> Trigger {
        self.inner.config.trigger.unwrap_or_default()
    }

    /// True when this backend can register events in `one_shot` mode.
    #[must_use]
    pub fn supports_one_shot(&self, one_shot: bool) -> bool {
        self.inner.supports_one_shot(one_shot)
    }

    /// True when this backend can register events with `trigger`.
    #[must_use]
    pub fn supports_trigger(&self, trigger: Trigger) -> bool {
        self.inner.supports_trigger(trigger)
    }

    /// True: this backend polls socket error queues.
    #[must_use]
    pub fn supports_notifications(&self) -> bool { true }

    /// Reactor-level metrics.
    #[must_use]
    pub fn metrics(&self) -> ReactorMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// The name of the driver backend.
    #[must_use]
    pub fn name(&self) -> &'static str { "EPOLL" }
}

impl Executor for Reactor {
    fn execute(&self, functor: Functor) {
        self.inner.chronology.execute(functor);
    }

    fn move_and_execute(
        &self,
        sequence: &mut FunctorSequence,
        functor: Functor,
    ) {
        self.inner.chronology.move_and_execute(sequence, functor);
    }
}
