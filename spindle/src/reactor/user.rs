// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Optional collaborators injected into a reactor at construction. A null
//! collaborator yields a sensible default: no limiter means unlimited
//! reservations, no metrics means fresh counters, no parent chronology
//! means the reactor schedules its own timers.

use crate::chronology::chronology_struct::Chronology;
use crate::reactor::metrics::ReactorMetrics;
use std::sync::Arc;

/// Bounds the number of descriptor reservations the reactor's sockets may
/// hold at once.
pub trait ConnectionLimiter: Send + Sync {
    /// Attempts to take one reservation; false means the limit is reached.
    fn acquire(&self) -> bool;

    /// Returns one reservation.
    fn release(&self);
}

/// The environment a reactor operates in. Every accessor is optional.
pub trait User: Send + Sync {
    /// Shared metrics to record into instead of reactor-local counters.
    fn reactor_metrics(&self) -> Option<Arc<ReactorMetrics>> { None }

    /// A limiter consulted by
    /// [`Reactor::acquire_handle_reservation`](crate::Reactor::acquire_handle_reservation).
    fn connection_limiter(&self) -> Option<Arc<dyn ConnectionLimiter>> {
        None
    }

    /// A parent chronology to register timers with instead of the
    /// reactor's own.
    fn chronology(&self) -> Option<Arc<Chronology>> { None }
}
