// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Per-descriptor interest: which event kinds a caller wants to be notified
//! about, how delivery is triggered, and whether delivery is one-shot.

/// Trigger mode for event detection.
///
/// Level-triggered events occur as long as the condition holds;
/// edge-triggered events are raised when the condition is first satisfied
/// and not again until it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum Trigger {
    /// Fire as long as the condition holds.
    #[default]
    Level,
    /// Fire on the transition into the condition.
    Edge,
}

/// Per-registration overrides for trigger and one-shot mode.
///
/// A `None` field means "keep the entry's current value" (which starts from
/// the reactor's configured defaults). Overrides the backend cannot honor
/// fail the `show_*` call with
/// [`Error::NotSupported`](crate::Error::NotSupported).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOptions {
    pub trigger: Option<Trigger>,
    pub one_shot: Option<bool>,
}

impl EventOptions {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn with_one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = Some(one_shot);
        self
    }
}

/// The set of event kinds a caller wishes to be notified about for one
/// descriptor, plus the trigger and one-shot delivery modes.
///
/// The toggles are independent; `{none, Level, false}` is a valid empty
/// interest. Trigger and one-shot change only when interest is
/// re-established with new [`EventOptions`], never on `hide_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    readable: bool,
    writable: bool,
    error: bool,
    notifications: bool,
    trigger: Trigger,
    one_shot: bool,
}

impl Interest {
    /// Creates an empty interest with the specified delivery defaults.
    #[must_use]
    pub fn new(trigger: Trigger, one_shot: bool) -> Self {
        Self {
            trigger,
            one_shot,
            ..Self::default()
        }
    }

    fn apply_options(&mut self, options: EventOptions) {
        if let Some(trigger) = options.trigger {
            self.trigger = trigger;
        }
        if let Some(one_shot) = options.one_shot {
            self.one_shot = one_shot;
        }
    }

    pub fn show_readable(&mut self, options: EventOptions) {
        self.readable = true;
        self.apply_options(options);
    }

    pub fn show_writable(&mut self, options: EventOptions) {
        self.writable = true;
        self.apply_options(options);
    }

    pub fn show_error(&mut self, options: EventOptions) {
        self.error = true;
        self.apply_options(options);
    }

    pub fn show_notifications(&mut self) { self.notifications = true; }

    pub fn hide_readable(&mut self) { self.readable = false; }

    pub fn hide_writable(&mut self) { self.writable = false; }

    pub fn hide_error(&mut self) { self.error = false; }

    pub fn hide_notifications(&mut self) { self.notifications = false; }

    #[must_use]
    pub fn want_readable(&self) -> bool { self.readable }

    #[must_use]
    pub fn want_writable(&self) -> bool { self.writable }

    #[must_use]
    pub fn want_error(&self) -> bool { self.error }

    #[must_use]
    pub fn want_notifications(&self) -> bool { self.notifications }

    /// Returns true while any I/O interest remains; the auto-detach path
    /// keys off this.
    #[must_use]
    pub fn want_readable_or_writable(&self) -> bool {
        self.readable || self.writable
    }

    #[must_use]
    pub fn trigger(&self) -> Trigger { self.trigger }

    #[must_use]
    pub fn one_shot(&self) -> bool { self.one_shot }
}
