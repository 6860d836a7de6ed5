//! Bounded polling for infrastructure convergence.
//!
//! Platform operations such as NIC attach/detach or instance removal
//! complete asynchronously. Callers wait for them with [`wait_for`], which
//! caps both the poll interval and the attempt count and fails with
//! [`WaitError::Timeout`] instead of polling forever.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Upper bound on the interval between two polls.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on the number of polls.
pub const MAX_POLL_ATTEMPTS: u32 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("condition not met after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("poll check failed: {0}")]
    Check(String),
}

/// Interval and attempt budget for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    interval: Duration,
    max_attempts: u32,
}

impl PollOptions {
    /// Build options, clamping to [`MAX_POLL_INTERVAL`] and
    /// `1..=`[`MAX_POLL_ATTEMPTS`].
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval: interval.min(MAX_POLL_INTERVAL),
            max_attempts: max_attempts.clamp(1, MAX_POLL_ATTEMPTS),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 12)
    }
}

/// Poll `check` until it yields `Some`, an error, or the budget runs out.
///
/// `check` receives the 1-based attempt number. The loop sleeps for the
/// configured interval between attempts, never after the last one.
pub async fn wait_for<T, E, F, Fut>(options: PollOptions, mut check: F) -> Result<T, WaitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    for attempt in 1..=options.max_attempts {
        match check(attempt).await {
            Ok(Some(value)) => {
                debug!(attempt, "poll condition met");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => return Err(WaitError::Check(e.to_string())),
        }
        if attempt < options.max_attempts {
            tokio::time::sleep(options.interval).await;
        }
    }
    Err(WaitError::Timeout {
        attempts: options.max_attempts,
    })
}
