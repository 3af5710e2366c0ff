//! Reconnect controller
//!
//! Pure backoff bookkeeping: whether another automatic reconnect may be
//! scheduled and how long to wait before it. Timers are owned by the
//! connection manager; nothing in this module sleeps.

use crate::config::ConnectionConfig;
use std::time::Duration;

/// Retry budget and backoff shape for one manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling applied to the doubled delay (None = uncapped)
    pub max_delay: Option<Duration>,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.reconnect_limit(),
            initial_delay: config.initial_reconnect_delay(),
            max_delay: config.max_reconnect_delay(),
        }
    }

    /// Delay for the retry following `attempt` previous attempts:
    /// `initial_delay * 2^attempt`, saturating and capped by `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let uncapped = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(max_delay) => uncapped.min(max_delay),
            None => uncapped,
        }
    }
}

/// Attempt counter and the delay that the next retry will use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub current_delay: Duration,
    /// Exhaustion has been reported; cleared by `reset`
    pub exhausted: bool,
}

/// Decision result for a failure event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule retry number `attempt` (1-based) after `delay`
    Schedule { attempt: u32, delay: Duration },
    /// Attempt ceiling reached; no retry until an explicit connect
    Exhausted { max_attempts: u32 },
}

impl ReconnectState {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            attempt_count: 0,
            current_delay: policy.initial_delay,
            exhausted: false,
        }
    }

    /// Back to `{0, initial_delay}` after a successful connection or an explicit connect
    pub fn reset(&mut self, policy: &ReconnectPolicy) {
        *self = Self::new(policy);
    }

    /// Decide what to do after a connection failure
    pub fn decide(&self, policy: &ReconnectPolicy) -> ReconnectDecision {
        if let Some(max_attempts) = policy.max_attempts {
            if self.attempt_count >= max_attempts {
                return ReconnectDecision::Exhausted { max_attempts };
            }
        }

        ReconnectDecision::Schedule {
            attempt: self.attempt_count.saturating_add(1),
            delay: self.current_delay,
        }
    }

    /// Record that a scheduled retry fired: count+1, delay doubled
    pub fn record_attempt(&mut self, policy: &ReconnectPolicy) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.current_delay = policy.backoff_delay(self.attempt_count);
    }

    /// Mark exhaustion as reported; false if it already was
    pub fn mark_exhausted(&mut self) -> bool {
        !std::mem::replace(&mut self.exhausted, true)
    }
}
