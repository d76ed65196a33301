// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Reactor configuration. All knobs are optional; [`ReactorConfig::normalize`]
//! fills defaults and reconciles inconsistent combinations the same way at
//! every construction site.

use crate::reactor::interest::Trigger;

/// Upper bound the waiter pool is clamped to.
pub const DEFAULT_MAX_THREADS: usize = 128;

/// Events returned from a single OS wait by default.
pub const DEFAULT_MAX_EVENTS_PER_WAIT: usize = 128;

/// Timers announced per chronology cycle by default.
pub const DEFAULT_MAX_TIMERS_PER_WAIT: usize = 256;

/// Chronology drain rounds per reactor iteration by default.
pub const DEFAULT_MAX_CYCLES_PER_WAIT: usize = 2;

/// Recognized reactor options. Unset fields take defaults in
/// [`ReactorConfig::normalize`].
#[derive(Debug, Clone, Default)]
pub struct ReactorConfig {
    /// Name used for metrics and thread labels.
    pub metric_name: Option<String>,
    /// Minimum number of waiter threads expected to drive the reactor.
    pub min_threads: Option<usize>,
    /// Maximum number of waiter threads; `> 1` forces one-shot delivery by
    /// default and disables the single-thread fast paths.
    pub max_threads: Option<usize>,
    /// Upper bound on events returned from a single OS wait.
    pub max_events_per_wait: Option<usize>,
    /// Upper bound on timers announced per chronology cycle.
    pub max_timers_per_wait: Option<usize>,
    /// Upper bound on chronology drain rounds per iteration.
    pub max_cycles_per_wait: Option<usize>,
    /// Collect reactor-level metrics.
    pub metric_collection: Option<bool>,
    /// Additionally collect per-waiter metrics.
    pub metric_collection_per_waiter: Option<bool>,
    /// Additionally collect per-socket metrics.
    pub metric_collection_per_socket: Option<bool>,
    /// Implicitly attach unknown handles on the first `show_*`.
    pub auto_attach: Option<bool>,
    /// Implicitly detach entries whose interest empties on `hide_*`.
    pub auto_detach: Option<bool>,
    /// Default one-shot mode for new registrations.
    pub one_shot: Option<bool>,
    /// Default trigger mode for new registrations.
    pub trigger: Option<Trigger>,
}

impl ReactorConfig {
    /// Fills defaults and reconciles thread bounds. Called once by
    /// `Reactor::new`; afterwards every option is `Some`.
    pub fn normalize(&mut self) {
        if self.metric_name.as_deref().is_none_or(str::is_empty) {
            self.metric_name = Some("reactor".to_string());
        }

        if self.min_threads.is_none_or(|threads| threads == 0) {
            self.min_threads = Some(1);
        }
        if self.max_threads.is_none_or(|threads| threads == 0) {
            self.max_threads = Some(DEFAULT_MAX_THREADS);
        }
        if self.max_threads.unwrap_or(1) > DEFAULT_MAX_THREADS {
            self.max_threads = Some(DEFAULT_MAX_THREADS);
        }
        if self.min_threads > self.max_threads {
            self.min_threads = self.max_threads;
        }

        if self.max_events_per_wait.is_none() {
            self.max_events_per_wait = Some(DEFAULT_MAX_EVENTS_PER_WAIT);
        }
        if self.max_timers_per_wait.is_none() {
            self.max_timers_per_wait = Some(DEFAULT_MAX_TIMERS_PER_WAIT);
        }
        if self.max_cycles_per_wait.is_none() {
            self.max_cycles_per_wait = Some(DEFAULT_MAX_CYCLES_PER_WAIT);
        }

        if self.metric_collection.is_none() {
            self.metric_collection = Some(true);
        }
        if self.metric_collection_per_waiter.is_none() {
            self.metric_collection_per_waiter = Some(false);
        }
        if self.metric_collection_per_socket.is_none() {
            self.metric_collection_per_socket = Some(false);
        }

        if self.auto_attach.is_none() {
            self.auto_attach = Some(false);
        }
        if self.auto_detach.is_none() {
            self.auto_detach = Some(false);
        }

        // Parallel waiters must not dispatch one event twice; one-shot
        // delivery is the default guard above one thread.
        if self.one_shot.is_none() {
            self.one_shot = Some(self.max_threads.unwrap_or(1) > 1);
        }
        if self.trigger.is_none() {
            self.trigger = Some(Trigger::Level);
        }
    }
}

/// Options describing a thread enrolling as a waiter.
#[derive(Debug, Clone, Default)]
pub struct WaiterOptions {
    /// Name used for this waiter's metrics.
    pub metric_name: Option<String>,
    /// The waiter's index in its thread pool, when driven by one.
    pub thread_index: Option<usize>,
}

/// Options weighting load-balancing decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancingOptions {
    /// Relative weight of the work being placed; defaults to 1.
    pub weight: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_fills_defaults() {
        let mut config = ReactorConfig::default();
        config.normalize();

        assert_eq!(config.min_threads, Some(1));
        assert_eq!(config.max_threads, Some(DEFAULT_MAX_THREADS));
        assert_eq!(
            config.max_events_per_wait,
            Some(DEFAULT_MAX_EVENTS_PER_WAIT)
        );
        assert_eq!(config.auto_attach, Some(false));
        assert_eq!(config.trigger, Some(Trigger::Level));
        // max_threads > 1 forces one-shot by default.
        assert_eq!(config.one_shot, Some(true));
    }

    #[test]
    fn test_single_thread_defaults_to_level_multishot() {
        let mut config = ReactorConfig {
            max_threads: Some(1),
            ..ReactorConfig::default()
        };
        config.normalize();
        assert_eq!(config.one_shot, Some(false));
        assert_eq!(config.min_threads, Some(1));
    }

    #[test]
    fn test_thread_bounds_reconciled() {
        let mut config = ReactorConfig {
            min_threads: Some(16),
            max_threads: Some(4),
            ..ReactorConfig::default()
        };
        config.normalize();
        assert_eq!(config.min_threads, Some(4));
        assert_eq!(config.max_threads, Some(4));
    }
}
