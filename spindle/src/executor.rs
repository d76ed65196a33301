// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Deferred-function execution surface shared by the reactor, the
//! chronology, and strands.

use std::collections::VecDeque;

/// A deferred unit of work.
///
/// Functors run exactly once, on whichever waiter thread drains the queue
/// they were submitted to.
pub type Functor = Box<dyn FnOnce() + Send + 'static>;

/// An ordered batch of deferred work, spliced atomically by
/// [`Executor::move_and_execute`].
pub type FunctorSequence = VecDeque<Functor>;

/// Defers execution of functions onto the threads driving an event loop.
///
/// Implemented by the reactor (FIFO across all waiters) and by
/// [`Strand`](crate::Strand) (FIFO with the additional guarantee that no two
/// functors run concurrently).
pub trait Executor: Send + Sync {
    /// Defers the execution of `functor`.
    fn execute(&self, functor: Functor);

    /// Atomically defers the execution of `sequence` immediately followed by
    /// `functor`, then clears `sequence`.
    fn move_and_execute(&self, sequence: &mut FunctorSequence, functor: Functor);
}
