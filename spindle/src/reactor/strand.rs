// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! A strand serializes arbitrary functions onto an executor: submitted
//! work runs in FIFO order and never concurrently, even when the executor
//! dispatches on many waiter threads.

use crate::executor::{Executor, Functor, FunctorSequence};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Jobs drained per scheduled run, so one busy strand cannot starve the
/// executor's other work.
const MAX_JOBS_PER_RUN: usize = 64;

/// An ordered executor multiplexed onto another executor (typically a
/// reactor).
///
/// At most one drain job for the strand is in flight on the underlying
/// executor at any time; that job runs queued functors in FIFO order and
/// reschedules itself while work remains.
pub struct Strand {
    executor: Arc<dyn Executor>,
    queue: Mutex<VecDeque<Functor>>,
    active: AtomicBool,
}

impl std::fmt::Debug for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strand")
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Strand {
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            executor,
            queue: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(false),
        })
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Functor>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueues `functor` and schedules a drain job unless one is already
    /// in flight.
    pub fn post(self: &Arc<Self>, functor: Functor) {
        let should_schedule = {
            let mut queue = self.lock_queue();
            queue.push_back(functor);
            !self.active.swap(true, Ordering::SeqCst)
        };
        if should_schedule {
            self.schedule_run();
        }
    }

    fn schedule_run(self: &Arc<Self>) {
        let strand = self.clone();
        self.executor.execute(Box::new(move || strand.run()));
    }

    fn run(self: Arc<Self>) {
        let batch: Vec<Functor> = {
            let mut queue = self.lock_queue();
            let take = queue.len().min(MAX_JOBS_PER_RUN);
            queue.drain(..take).collect()
        };
        for functor in batch {
            functor();
        }
        let more = {
            let queue = self.lock_queue();
            if queue.is_empty() {
                self.active.store(false, Ordering::SeqCst);
                false
            } else {
                true
            }
        };
        if more {
            self.schedule_run();
        }
    }
}

impl Executor for Arc<Strand> {
    fn execute(&self, functor: Functor) { self.post(functor); }

    fn move_and_execute(
        &self,
        sequence: &mut FunctorSequence,
        functor: Functor,
    ) {
        let should_schedule = {
            let mut queue = self.lock_queue();
            queue.append(sequence);
            queue.push_back(functor);
            !self.active.swap(true, Ordering::SeqCst)
        };
        if should_schedule {
            self.schedule_run();
        }
    }
}
