// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Time source abstraction. The chronology never reads the OS clock
//! directly; deadlines are absolute values on a [`Clock`]'s monotonic
//! epoch, which lets tests drive time by hand.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time source.
///
/// `current_time` returns the absolute elapsed time since the clock's
/// epoch. Values never decrease.
pub trait Clock: Send + Sync + 'static {
    fn current_time(&self) -> Duration;
}

/// Production clock backed by [`Instant`]; the epoch is the moment of
/// construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Convenience for the common `Arc<dyn Clock>` shape.
    #[must_use]
    pub fn shared() -> Arc<dyn Clock> { Arc::new(Self::new()) }
}

impl Default for MonotonicClock {
    fn default() -> Self { Self::new() }
}

impl Clock for MonotonicClock {
    fn current_time(&self) -> Duration { self.epoch.elapsed() }
}
