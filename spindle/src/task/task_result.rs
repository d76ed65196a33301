// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! The three-state result slot of a task: undefined until the computation
//! finishes, then success or failure, released exactly once.

use std::any::Any;
use std::panic::resume_unwind;

/// A captured failure: the panic payload that unwound out of a task's
/// frame, re-raised at [`TaskResult::release`].
pub struct TaskFailure {
    payload: Box<dyn Any + Send + 'static>,
}

impl std::fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self
            .payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                self.payload.downcast_ref::<String>().map(String::as_str)
            })
            .unwrap_or("<non-string panic payload>");
        f.debug_struct("TaskFailure").field("message", &message).finish()
    }
}

impl TaskFailure {
    #[must_use]
    pub fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { payload }
    }

    /// Re-raises the captured panic on the calling thread.
    pub fn resume(self) -> ! { resume_unwind(self.payload) }
}

/// The result of a task: undefined, a success value, or a captured
/// failure.
///
/// Reference results are expressed through the type parameter (`T` may be
/// `&U` or `&mut U`); unit results use `T = ()`.
#[derive(Debug)]
pub enum TaskResult<T> {
    /// The computation has not finished.
    Undefined,
    /// The computation finished with a value.
    Success(T),
    /// The computation failed; releasing re-raises the payload.
    Failure(TaskFailure),
}

impl<T> Default for TaskResult<T> {
    fn default() -> Self { TaskResult::Undefined }
}

impl<T> TaskResult<T> {
    #[must_use]
    pub fn is_defined(&self) -> bool {
        !matches!(self, TaskResult::Undefined)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskResult::Failure(_))
    }

    /// Consumes the slot: returns the success value or re-raises the
    /// captured failure. Consuming the slot makes a second release
    /// unrepresentable; releasing an undefined result is a contract
    /// violation.
    ///
    /// # Panics
    ///
    /// Re-raises the captured panic for failures, and panics on an
    /// undefined result.
    pub fn release(self) -> T {
        match self {
            TaskResult::Success(value) => value,
            TaskResult::Failure(failure) => failure.resume(),
            TaskResult::Undefined => {
                panic!("released an undefined task result")
            }
        }
    }
}
