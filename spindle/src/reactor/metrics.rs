// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Reactor observability counters. Updated lock-free on the dispatch path;
//! read via [`ReactorMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for one reactor (or one waiter, when per-waiter
/// collection is enabled).
#[derive(Debug, Default)]
pub struct ReactorMetrics {
    num_polls: AtomicU64,
    num_readable: AtomicU64,
    num_writable: AtomicU64,
    num_errors: AtomicU64,
    num_notifications: AtomicU64,
    num_detachments: AtomicU64,
    num_spurious_wakeups: AtomicU64,
    num_interrupts: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReactorMetricsSnapshot {
    pub num_polls: u64,
    pub num_readable: u64,
    pub num_writable: u64,
    pub num_errors: u64,
    pub num_notifications: u64,
    pub num_detachments: u64,
    pub num_spurious_wakeups: u64,
    pub num_interrupts: u64,
}

impl ReactorMetrics {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn update_poll(
        &self,
        readable: u64,
        writable: u64,
        errors: u64,
        notifications: u64,
        detachments: u64,
    ) {
        self.num_polls.fetch_add(1, Ordering::Relaxed);
        self.num_readable.fetch_add(readable, Ordering::Relaxed);
        self.num_writable.fetch_add(writable, Ordering::Relaxed);
        self.num_errors.fetch_add(errors, Ordering::Relaxed);
        self.num_notifications
            .fetch_add(notifications, Ordering::Relaxed);
        self.num_detachments
            .fetch_add(detachments, Ordering::Relaxed);
    }

    pub fn update_spurious_wakeup(&self) {
        self.num_spurious_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_interrupt(&self) {
        self.num_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ReactorMetricsSnapshot {
        ReactorMetricsSnapshot {
            num_polls: self.num_polls.load(Ordering::Relaxed),
            num_readable: self.num_readable.load(Ordering::Relaxed),
            num_writable: self.num_writable.load(Ordering::Relaxed),
            num_errors: self.num_errors.load(Ordering::Relaxed),
            num_notifications: self.num_notifications.load(Ordering::Relaxed),
            num_detachments: self.num_detachments.load(Ordering::Relaxed),
            num_spurious_wakeups: self
                .num_spurious_wakeups
                .load(Ordering::Relaxed),
            num_interrupts: self.num_interrupts.load(Ordering::Relaxed),
        }
    }
}
