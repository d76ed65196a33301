// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Callback interfaces the reactor invokes inline on its waiter threads.

use crate::reactor::event::{NotificationQueue, ReactorEvent};
use crate::reactor::handle::Handle;
use std::sync::Arc;

/// A higher-level socket object driven by the reactor.
///
/// The driver calls the `process_*` methods inline from the waiter thread
/// that polled the event. Implementations must not block indefinitely and
/// must not re-enter the reactor's internal locks.
pub trait ReactorSocket: Send + Sync {
    /// The descriptor this session wraps.
    fn handle(&self) -> Handle;

    /// The socket became readable (or the peer hung up).
    fn process_readable(&self, event: &ReactorEvent);

    /// The socket became writable.
    fn process_writable(&self, event: &ReactorEvent);

    /// The socket failed; `event` carries the classified error.
    fn process_error(&self, event: &ReactorEvent);

    /// Messages were drained from the socket's error queue.
    fn process_notifications(&self, notifications: &NotificationQueue);

    /// The reactor is shutting the session down (`close_all`).
    fn close(&self);
}

/// Callback registered per event kind when driving a raw handle without a
/// [`ReactorSocket`] session. Replaced atomically on re-registration. The
/// driver clones the callback out of the entry before invoking it, so a
/// callback may re-register interest on its own descriptor.
pub type EventCallback = Arc<dyn Fn(&ReactorEvent) + Send + Sync + 'static>;

/// Callback receiving drained notification batches for a raw handle.
pub type NotificationCallback =
    Arc<dyn Fn(&NotificationQueue) + Send + Sync + 'static>;

/// One-shot callback observing the completion of a detach.
///
/// Fires exactly once, after the last in-flight dispatch for the detached
/// entry has returned; synchronously from `detach` itself when nothing is in
/// flight.
pub type DetachCallback = Box<dyn FnOnce() + Send + 'static>;
