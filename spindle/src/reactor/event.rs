// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

// cspell:words errqueue

//! Reactor events delivered to sessions and callbacks, and the notification
//! queue drained from a socket's error queue.

use crate::error::Error;
use crate::reactor::handle::{Handle, INVALID_HANDLE};
use smallvec::SmallVec;

/// The kind of condition a reactor event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ReactorEventType {
    Readable,
    Writable,
    Error,
}

/// One readiness event for one descriptor.
///
/// Error events carry the classified socket error; readable and writable
/// events carry none.
#[derive(Debug)]
pub struct ReactorEvent {
    handle: Handle,
    event_type: ReactorEventType,
    error: Option<Error>,
}

impl ReactorEvent {
    #[must_use]
    pub fn new(handle: Handle, event_type: ReactorEventType) -> Self {
        Self {
            handle,
            event_type,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(handle: Handle, error: Error) -> Self {
        Self {
            handle,
            event_type: ReactorEventType::Error,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle { self.handle }

    #[must_use]
    pub fn event_type(&self) -> ReactorEventType { self.event_type }

    #[must_use]
    pub fn error(&self) -> Option<&Error> { self.error.as_ref() }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.event_type == ReactorEventType::Readable
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.event_type == ReactorEventType::Writable
    }

    #[must_use]
    pub fn is_error(&self) -> bool { self.event_type == ReactorEventType::Error }
}

/// One message drained from a socket's error queue.
///
/// The payload is opaque to the reactor core; protocol layers interpret it.
#[derive(Debug, Clone)]
pub struct Notification {
    bytes: Vec<u8>,
}

impl Notification {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self { Self { bytes } }

    #[must_use]
    pub fn bytes(&self) -> &[u8] { &self.bytes }
}

/// The batch of notifications drained from one descriptor in one poll cycle.
///
/// Sized for the common case of a handful of messages without a heap
/// allocation.
#[derive(Debug)]
pub struct NotificationQueue {
    handle: Handle,
    notifications: SmallVec<[Notification; 4]>,
}

impl NotificationQueue {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            notifications: SmallVec::new(),
        }
    }

    pub fn push(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    #[must_use]
    pub fn handle(&self) -> Handle { self.handle }

    #[must_use]
    pub fn len(&self) -> usize { self.notifications.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.notifications.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }
}

impl Default for NotificationQueue {
    fn default() -> Self { Self::new(INVALID_HANDLE) }
}
