// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Tasks: value-returning suspendable computations, their result slots,
//! and the thread-blocking synchronization bridge.

// Attach sources.
pub mod synchronize;
pub mod task_result;
pub mod task_struct;

// Re-export.
pub use synchronize::*;
pub use task_result::*;
pub use task_struct::*;
