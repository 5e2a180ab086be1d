//! Exponential-backoff schedule for device feed connections.
//!
//! Each device task owns one [`Backoff`] across all of its sessions:
//! failed connect attempts grow the delay up to a ceiling, a sustained
//! connected period resets it to the floor, and a run of consecutive
//! failures marks the device disconnected while retries continue.

use std::time::Duration;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Consecutive connect failures after which the device is surfaced
    /// as disconnected. Retries continue past this point.
    pub failure_threshold: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            failure_threshold: 5,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Backoff bookkeeping for one device, carried across sessions.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    delay: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            delay,
            consecutive_failures: 0,
        }
    }

    /// The delay to wait before the next connect attempt.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a failed connect attempt.
    ///
    /// Returns the delay to wait before retrying; the schedule grows
    /// for the failure after that.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let wait = self.delay;
        self.delay = next_delay(self.delay, &self.config);
        wait
    }

    /// Whether the consecutive-failure threshold has been reached.
    pub fn threshold_crossed(&self) -> bool {
        self.consecutive_failures >= self.config.failure_threshold
    }

    /// Record a successful connect, ending the failure run.
    pub fn record_connected(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record the end of a connected session.
    ///
    /// A session that outlived the backoff ceiling counts as sustained
    /// and resets the schedule to the floor; a shorter session keeps
    /// the grown delay so a flapping broker is not hammered.
    pub fn record_session_end(&mut self, connected_for: Duration) {
        if connected_for >= self.config.max_delay {
            self.delay = self.config.initial_delay;
        }
    }
}
