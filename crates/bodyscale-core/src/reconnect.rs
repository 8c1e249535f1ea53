//! Bounded reconnection after an unexpected disconnect.
//!
//! The policy only counts and schedules; the engine arms it, waits out the
//! delay, and performs the connect. Every scheduled attempt goes through
//! [`ReconnectionPolicy::record_attempt`]. Once `max_attempts` have been
//! used, the next request reports exhaustion exactly once and every request
//! after that is ignored until the policy is reset.

use std::time::Duration;

use crate::error::{Error, Result};

/// Options for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Maximum number of reconnection attempts per episode.
    pub max_attempts: u32,
    /// Fixed delay before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(3000),
        }
    }
}

impl ReconnectOptions {
    /// Create new reconnect options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of reconnection attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before each attempt.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `max_attempts` is > 0
    /// - `delay` is > 0
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max_attempts must be > 0"));
        }
        if self.delay.is_zero() {
            return Err(Error::invalid_config("reconnect delay must be > 0"));
        }
        Ok(())
    }
}

/// What the engine should do after asking for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Connect again after `delay`.
    Attempt {
        /// 1-based attempt number.
        attempt: u32,
        /// How long to wait first.
        delay: Duration,
    },
    /// The budget is spent. Reported once per episode.
    Exhausted {
        /// Attempts made in this episode.
        attempts: u32,
    },
    /// Exhaustion was already reported; do nothing.
    Idle,
}

/// Attempt counter and exhaustion latch.
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    options: ReconnectOptions,
    attempts: u32,
    exhausted_fired: bool,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self::new(ReconnectOptions::default())
    }
}

impl ReconnectionPolicy {
    /// Create a policy with the given options.
    pub fn new(options: ReconnectOptions) -> Self {
        Self {
            options,
            attempts: 0,
            exhausted_fired: false,
        }
    }

    /// The options in use.
    pub fn options(&self) -> &ReconnectOptions {
        &self.options
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether exhaustion has been reported since the last reset.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted_fired
    }

    /// Request another attempt.
    pub fn record_attempt(&mut self) -> ReconnectDecision {
        if self.attempts >= self.options.max_attempts {
            if self.exhausted_fired {
                return ReconnectDecision::Idle;
            }
            self.exhausted_fired = true;
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        ReconnectDecision::Attempt {
            attempt: self.attempts,
            delay: self.options.delay,
        }
    }

    /// Start over: zero attempts and re-arm exhaustion.
    ///
    /// Called on every successful connect and on a manual reconnect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.exhausted_fired = false;
    }
}
