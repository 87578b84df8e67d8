//! Bounded polling primitive.
//!
//! Every suspension point in the harness goes through a [`Poller`]: observe,
//! then sleep for at most the poll interval (never past the deadline), then
//! observe again. A zero timeout means a single observation.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for wait operations (10 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Default polling interval (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Options for wait operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// =============================================================================
// WAIT RESULT
// =============================================================================

/// Result of a wait operation
#[derive(Debug, Clone)]
pub struct WaitResult {
    /// Whether the wait was successful
    pub success: bool,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Number of observations made
    pub polls: u32,
    /// Description of what was waited for
    pub waited_for: String,
}

impl WaitResult {
    /// Create a successful wait result
    #[must_use]
    pub fn success(elapsed: Duration, polls: u32, waited_for: impl Into<String>) -> Self {
        Self {
            success: true,
            elapsed,
            polls,
            waited_for: waited_for.into(),
        }
    }

    /// Create a timeout wait result
    #[must_use]
    pub fn timeout(elapsed: Duration, polls: u32, waited_for: impl Into<String>) -> Self {
        Self {
            success: false,
            elapsed,
            polls,
            waited_for: waited_for.into(),
        }
    }

    /// Elapsed time in whole milliseconds
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Deadline-bounded poll loop driver.
///
/// ```ignore
/// let mut poller = Poller::start(&options, "ruffle-embed");
/// loop {
///     if session.count(&selector).await? > 0 {
///         return Ok(poller.succeed());
///     }
///     if !poller.tick().await {
///         return Err(poller.time_out());
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Poller {
    timeout: Duration,
    poll_interval: Duration,
    started: Instant,
    polls: u32,
    waited_for: String,
}

impl Poller {
    /// Start the clock
    #[must_use]
    pub fn start(options: &WaitOptions, waited_for: impl Into<String>) -> Self {
        Self {
            timeout: options.timeout(),
            poll_interval: options.poll_interval(),
            started: Instant::now(),
            polls: 1,
            waited_for: waited_for.into(),
        }
    }

    /// Time since [`Poller::start`]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Observations made so far (the first one is counted at start)
    #[must_use]
    pub const fn polls(&self) -> u32 {
        self.polls
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Suspend until the next observation is due.
    ///
    /// Returns `false` without sleeping once the deadline has passed. The
    /// sleep never extends past the deadline, and a zero poll interval still
    /// yields to the runtime.
    pub async fn tick(&mut self) -> bool {
        let elapsed = self.elapsed();
        if elapsed >= self.timeout {
            return false;
        }
        let remaining = self.timeout - elapsed;
        let pause = self.poll_interval.min(remaining);
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(pause).await;
        }
        self.polls = self.polls.saturating_add(1);
        true
    }

    /// Finish with success
    #[must_use]
    pub fn succeed(&self) -> WaitResult {
        WaitResult::success(self.elapsed(), self.polls, self.waited_for.clone())
    }

    /// Finish with a timeout
    #[must_use]
    pub fn time_out(&self) -> WaitResult {
        WaitResult::timeout(self.elapsed(), self.polls, self.waited_for.clone())
    }
}

// =============================================================================
// TESTS
// =============================================================================
