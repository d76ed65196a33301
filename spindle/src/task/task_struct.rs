// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Tasks: value-returning suspendable computations. A [`Task`] owns its
//! activation frame (a boxed future), starts suspended, records its
//! awaiter on each poll, and stores its outcome in a three-state result
//! slot released at the awaiter's resume point.

use crate::task::task_result::{TaskFailure, TaskResult};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::trace;

/// A pinned, type-erased activation frame.
pub type TaskFrame<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Allocates activation frames for tasks.
///
/// This is the second of the two factory entry points replacing
/// parameter-tag allocator selection: [`Task::spawn`] uses the global
/// allocator, [`Task::spawn_in`] routes the frame through an implementation
/// of this trait (an arena, a pool, an instrumented heap).
pub trait FrameAllocator {
    /// Moves `future` into an owned, pinned frame.
    fn allocate<F>(&self, future: F) -> TaskFrame<F::Output>
    where
        F: Future + Send + 'static;
}

/// The process-wide default: frames live on the global heap.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalFrameAllocator;

impl FrameAllocator for GlobalFrameAllocator {
    fn allocate<F>(&self, future: F) -> TaskFrame<F::Output>
    where
        F: Future + Send + 'static,
    {
        Box::pin(future)
    }
}

/// A suspendable computation producing a `T` or failing with a captured
/// panic.
///
/// The task exclusively owns its frame: dropping an incomplete task
/// cancels the computation and destroys the frame. Awaiting a task records
/// the awaiter (the [`Waker`](std::task::Waker) in the polling context)
/// and resumes the frame; on completion the outcome lands in the result
/// slot and is released at the awaiter's resume point: the value is
/// returned, a captured panic is re-raised.
pub struct Task<T> {
    frame: Option<TaskFrame<T>>,
    result: TaskResult<T>,
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("complete", &self.is_complete())
            .field("failed", &self.has_failed())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task whose frame lives on the global heap. The task
    /// starts suspended; no progress happens until it is polled.
    #[must_use]
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::spawn_in(&GlobalFrameAllocator, future)
    }

    /// Creates a task whose frame is allocated by `allocator`.
    #[must_use]
    pub fn spawn_in<A, F>(allocator: &A, future: F) -> Self
    where
        A: FrameAllocator,
        F: Future<Output = T> + Send + 'static,
    {
        trace!("task spawned");
        Self {
            frame: Some(allocator.allocate(future)),
            result: TaskResult::Undefined,
        }
    }
}

impl<T> Task<T> {
    /// True once the computation finished, successfully or not.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.result.is_defined() }

    /// True when the computation failed with a captured panic.
    #[must_use]
    pub fn has_failed(&self) -> bool { self.result.is_failure() }

    /// Resumes the frame once. A completed step stores the outcome and
    /// destroys the frame; a panic out of the frame is captured as the
    /// failure outcome.
    fn step(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(frame) = self.frame.as_mut() else {
            return self.result.is_defined();
        };
        let stepped =
            catch_unwind(AssertUnwindSafe(|| frame.as_mut().poll(cx)));
        match stepped {
            Ok(Poll::Pending) => false,
            Ok(Poll::Ready(value)) => {
                trace!("task completed");
                self.result = TaskResult::Success(value);
                self.frame = None;
                true
            }
            Err(payload) => {
                trace!("task failed");
                self.result =
                    TaskResult::Failure(TaskFailure::new(payload));
                self.frame = None;
                true
            }
        }
    }

    /// Takes the outcome: the value, or the re-raised captured panic.
    ///
    /// # Panics
    ///
    /// Panics when called before completion, and re-raises the captured
    /// panic for failed tasks.
    pub fn release(&mut self) -> T {
        std::mem::take(&mut self.result).release()
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: no field of Task is structurally pinned; the frame is
        // separately heap-pinned and the result slot is moved out only by
        // value. The Task itself never relies on a stable address.
        let this = unsafe { self.get_unchecked_mut() };
        if this.is_complete() || this.step(cx) {
            Poll::Ready(this.release())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::synchronize::synchronize;
    use pretty_assertions::assert_eq;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_task_starts_suspended() {
        let progressed = Arc::new(AtomicUsize::new(0));
        let progressed_clone = progressed.clone();
        let task = Task::spawn(async move {
            progressed_clone.fetch_add(1, Ordering::SeqCst);
            7
        });

        // Creation alone makes no progress.
        assert_eq!(progressed.load(Ordering::SeqCst), 0);
        assert!(!task.is_complete());

        assert_eq!(synchronize(task), 7);
        assert_eq!(progressed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_in_uses_the_supplied_allocator() {
        struct CountingAllocator {
            allocations: Arc<AtomicUsize>,
        }

        impl FrameAllocator for CountingAllocator {
            fn allocate<F>(&self, future: F) -> TaskFrame<F::Output>
            where
                F: Future + Send + 'static,
            {
                self.allocations.fetch_add(1, Ordering::SeqCst);
                Box::pin(future)
            }
        }

        let allocations = Arc::new(AtomicUsize::new(0));
        let allocator = CountingAllocator {
            allocations: allocations.clone(),
        };
        let task = Task::spawn_in(&allocator, async { "done" });
        assert_eq!(allocations.load(Ordering::SeqCst), 1);
        assert_eq!(synchronize(task), "done");
    }

    #[test]
    fn test_unit_result() {
        let task = Task::spawn(async {});
        synchronize(task);
    }

    #[test]
    fn test_panic_captured_and_resumed_at_release() {
        let task: Task<i32> = Task::spawn(async { panic!("task boom") });
        let outcome =
            catch_unwind(AssertUnwindSafe(|| synchronize(task)));
        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"task boom"));
    }

    #[test]
    fn test_dropping_an_incomplete_task_cancels_it() {
        struct SetOnDrop(Arc<AtomicUsize>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) { self.0.fetch_add(1, Ordering::SeqCst); }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let guard = SetOnDrop(dropped.clone());
        let task = Task::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        drop(task);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tasks_compose() {
        let inner = Task::spawn(async { 20 });
        let outer = Task::spawn(async move { inner.await + 22 });
        assert_eq!(synchronize(outer), 42);
    }
}
