//! Exponential reconnect policy.

use std::time::Duration;

use crate::config::TransportConfig;

/// Computes the delay before each automatic reconnect attempt.
///
/// Attempt `n` (1-based) waits `initial * multiplier^(n-1)`, never more than
/// `max_delay`. Past `max_attempts` the policy gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            initial: config.reconnect_interval,
            multiplier: config.backoff_multiplier,
            max_delay: config.max_reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before `attempt`, or `None` once the attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        // multiplier below 1 would shrink delays; clamp to keep growth monotonic
        let factor = self.multiplier.max(1.0).powi(exponent);
        let capped = (self.initial.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());

        if capped.is_finite() && capped >= 0.0 {
            Some(Duration::from_secs_f64(capped))
        } else {
            Some(self.max_delay)
        }
    }

    #[inline]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}
