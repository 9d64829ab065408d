//! Reconnect backoff policy.

use std::time::Duration;

/// Exponential backoff schedule for reconnect attempts.
///
/// The first retry waits `initial_delay`, each further attempt doubles (or
/// whatever `multiplier` says) up to `max_delay`. After `max_attempts` the
/// client gives up and requires explicit user action.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Returns the delay before reconnect attempt `attempt` (0-indexed),
    /// or `None` once the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Some(Duration::from_secs_f64(
            secs.min(self.max_delay.as_secs_f64()),
        ))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 30,
        }
    }
}
