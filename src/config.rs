//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the coordination runtime.
//!
//! Config is used in two places:
//! 1. **Supervisor creation**: `TaskSupervisor::new(config)` (shutdown grace)
//! 2. **Correlator creation**: `ReplyCorrelator::new(name, outbound, &supervisor)` reads
//!    reply deadlines and the sweep period from the supervisor's config
//!
//! ## Sentinel values
//! - `grace = 0s` → shutdown waits without bound
//! - `reply_timeout = 0s` → pending replies never expire on their own

use std::time::Duration;

/// Lower bound for the expiration sweep period.
const MIN_EXPIRY_INTERVAL: Duration = Duration::from_millis(10);

/// Global configuration for the coordination runtime.
///
/// ## Field semantics
/// - `grace`: maximum wait for tracked tasks to drain on shutdown (`0s` = unbounded)
/// - `reply_timeout`: default deadline for a pending reply (`0s` = none)
/// - `expiry_interval`: how often the correlator sweeps for expired replies (min 10ms)
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for tracked tasks to stop after cancellation.
    ///
    /// When shutdown begins:
    /// - The shared `CancellationToken` is cancelled
    /// - The supervisor waits up to `grace` for tracked tasks to exit
    /// - Tasks still running afterwards are aborted and reported via `RuntimeError::GraceExceeded`
    pub grace: Duration,

    /// Default deadline for a request awaiting its reply.
    ///
    /// - `Duration::ZERO` = no deadline (caller cancellation or teardown only)
    /// - `> 0` = pending entry fails with `ReplyError::TimedOut` once expired
    pub reply_timeout: Duration,

    /// Period of the correlator's expiration sweep.
    pub expiry_interval: Duration,
}

impl Config {
    /// Returns the shutdown grace as an `Option`.
    ///
    /// - `None` → wait until every tracked task finishes
    /// - `Some(d)` → abort stragglers after `d`
    #[inline]
    pub fn shutdown_grace(&self) -> Option<Duration> {
        if self.grace == Duration::ZERO {
            None
        } else {
            Some(self.grace)
        }
    }

    /// Returns the default reply deadline as an `Option`.
    #[inline]
    pub fn default_reply_timeout(&self) -> Option<Duration> {
        if self.reply_timeout == Duration::ZERO {
            None
        } else {
            Some(self.reply_timeout)
        }
    }

    /// Returns the sweep period clamped to a minimum of 10ms.
    #[inline]
    pub fn expiry_interval_clamped(&self) -> Duration {
        self.expiry_interval.max(MIN_EXPIRY_INTERVAL)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 60s`
    /// - `reply_timeout = 30s`
    /// - `expiry_interval = 1s`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            reply_timeout: Duration::from_secs(30),
            expiry_interval: Duration::from_secs(1),
        }
    }
}
