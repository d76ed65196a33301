// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! The synchronization bridge: block a thread until a task completes,
//! whether it finishes on the calling thread or on another one.

use crate::task::task_struct::Task;
use std::pin::pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// The bridge's shared state: a done flag under a mutex, a condition
/// variable, and the waker identity handed to the task as its awaiter.
///
/// Whoever completes the task (possibly a reactor callback on another
/// thread) wakes the context; the blocked caller then takes another poll.
struct SyncContext {
    done: Mutex<bool>,
    condition: Condvar,
}

impl SyncContext {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            condition: Condvar::new(),
        }
    }

    /// Blocks until woken, then resets the flag for the next suspension.
    fn wait(&self) {
        let guard = match self.done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut guard = self
            .condition
            .wait_while(guard, |done| !*done)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = false;
    }
}

impl Wake for SyncContext {
    fn wake(self: Arc<Self>) { self.wake_by_ref(); }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut guard = match self.done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = true;
        self.condition.notify_one();
    }
}

/// Blocks the calling thread until `task` completes, then releases its
/// result: the value, or the task's captured panic re-raised here.
///
/// A task that completes entirely on the calling thread never sleeps: the
/// first poll runs it to completion and the condition variable is never
/// waited on. Tasks completed by another thread (a reactor waiter firing a
/// timer, for example) wake the caller through the task's awaiter.
///
/// # Panics
///
/// Re-raises the panic of a failed task.
pub fn synchronize<T>(task: Task<T>) -> T {
    let context = Arc::new(SyncContext::new());
    let waker = Waker::from(context.clone());
    let mut cx = Context::from_waker(&waker);

    let mut task = pin!(task);
    loop {
        match task.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => context.wait(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Completes when another thread flips the flag and wakes the waker.
    struct CrossThreadReady {
        state: Arc<Mutex<(bool, Option<Waker>)>>,
    }

    impl Future for CrossThreadReady {
        type Output = u64;

        fn poll(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Self::Output> {
            let mut state = self.state.lock().unwrap();
            if state.0 {
                Poll::Ready(99)
            } else {
                state.1 = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    #[test]
    fn test_synchronous_completion_never_sleeps() {
        let task = Task::spawn(async { 5 });
        assert_eq!(synchronize(task), 5);
    }

    #[test]
    fn test_completion_from_another_thread() {
        let state = Arc::new(Mutex::new((false, None::<Waker>)));
        let state_for_thread = state.clone();

        let completer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let waker = {
                let mut state = state_for_thread.lock().unwrap();
                state.0 = true;
                state.1.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        });

        let task = Task::spawn(async move {
            CrossThreadReady { state }.await
        });
        assert_eq!(synchronize(task), 99);
        completer.join().unwrap();
    }

    #[test]
    fn test_repeated_suspension() {
        /// Suspends a fixed number of times before completing.
        struct CountDown {
            remaining: u32,
        }

        impl Future for CountDown {
            type Output = u32;

            fn poll(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
            ) -> Poll<Self::Output> {
                if self.remaining == 0 {
                    Poll::Ready(0)
                } else {
                    self.remaining -= 1;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }

        let task = Task::spawn(async { CountDown { remaining: 3 }.await });
        assert_eq!(synchronize(task), 0);
    }
}
