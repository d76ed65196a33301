// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

// cspell:words chronology epoll eventfd

//! # Spindle
//!
//! Spindle is the core of an asynchronous networking runtime: an
//! event-driven I/O **reactor**, a timer **chronology**, and a **task**
//! machinery for expressing asynchronous computations as suspendable,
//! value-returning futures, plus a thread-blocking **synchronization
//! bridge**.
//!
//! The three subsystems are tightly coupled but separately usable:
//!
//! 1. [`Reactor`]: readiness multiplexing over `epoll`. It manages
//!    attached descriptors, translates per-descriptor [`Interest`] into
//!    the OS event set (level or edge trigger, optional one-shot),
//!    dispatches readable/writable/error/notification events inline on
//!    waiter threads, supports per-socket detach with exactly-once
//!    completion callbacks, and carries an `eventfd` controller so any
//!    thread can break a blocking wait.
//! 2. [`Chronology`]: one-shot and recurring timers plus deferred
//!    functions. It keeps deadlines ordered (insertion-stable for equal
//!    deadlines), computes the duration bounding the reactor's next OS
//!    wait, announces deadline/cancelled/closed events, and collapses
//!    missed periods of recurring timers into one catch-up event per
//!    announcement cycle.
//! 3. [`Task`]: a lazily started, value-returning suspendable
//!    computation with a three-state result slot released exactly once,
//!    and [`synchronize`] to drive one to completion from blocking code.
//!
//! ## A reactor in five lines
//!
//! ```no_run
//! use spindle::{Reactor, ReactorConfig, WaiterOptions};
//!
//! let reactor = Reactor::new(ReactorConfig::default())?;
//! let waiter = reactor.register_waiter(WaiterOptions::default());
//! reactor.run(&waiter); // until reactor.stop()
//! reactor.deregister_waiter(waiter);
//! # Ok::<(), spindle::Error>(())
//! ```
//!
//! Protocol sockets, TLS, DNS resolution, and data pooling are external
//! collaborators: the reactor consumes them through the
//! [`ReactorSocket`] and [`TimerSession`] interfaces and exposes
//! everything else as a library surface. Nothing here reads environment
//! variables or persists state.

// Attach sources.
pub mod chronology;
pub mod error;
pub mod executor;
pub mod reactor;
pub mod task;

// Re-export.
pub use chronology::*;
pub use error::*;
pub use executor::*;
pub use reactor::*;
pub use task::*;
