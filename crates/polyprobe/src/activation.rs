//! Polyfill activation.
//!
//! The polyfill swaps the legacy `<object>`/`<embed>` for its own element some
//! time after it is injected. [`ActivationWaiter`] observes the page until the
//! replacement shows up inside the fixture's container, or gives up.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::result::{CaseFailure, ProbeResult};
use crate::selector::{ElementHandle, Selector};
use crate::session::Session;
use crate::wait::{Poller, WaitOptions};

/// Default container the fixture page places the legacy tag in
pub const DEFAULT_SCOPE: &str = "#test-container";

/// Default selector for the legacy plugin tags
pub const DEFAULT_LEGACY: &str = "object, embed";

/// Default selector for the elements the polyfill substitutes
pub const DEFAULT_POLYFILLED: &str = "ruffle-object, ruffle-embed";

/// Activation progress of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// The replacement element has not been seen yet
    #[default]
    Pending,
    /// The replacement element is present
    Active,
    /// The wait ran out before the replacement appeared
    TimedOut,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Where to look for the legacy tag and its replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationTarget {
    scope: Selector,
    legacy: String,
    polyfilled: String,
}

impl Default for ActivationTarget {
    fn default() -> Self {
        Self::new(Selector::css(DEFAULT_SCOPE), DEFAULT_LEGACY, DEFAULT_POLYFILLED)
    }
}

impl ActivationTarget {
    /// Target with explicit selectors
    #[must_use]
    pub fn new(scope: Selector, legacy: impl Into<String>, polyfilled: impl Into<String>) -> Self {
        Self {
            scope,
            legacy: legacy.into(),
            polyfilled: polyfilled.into(),
        }
    }

    /// Container whose inner HTML is snapshotted
    #[must_use]
    pub const fn scope(&self) -> &Selector {
        &self.scope
    }

    /// Legacy tags inside the container
    #[must_use]
    pub fn legacy_selector(&self) -> Selector {
        self.scope.clone().within(self.legacy.clone())
    }

    /// Replacement elements inside the container
    #[must_use]
    pub fn polyfilled_selector(&self) -> Selector {
        self.scope.clone().within(self.polyfilled.clone())
    }
}

/// Waits, bounded, for the polyfill to take effect
#[derive(Debug, Clone, Default)]
pub struct ActivationWaiter {
    options: WaitOptions,
}

impl ActivationWaiter {
    /// Create a waiter
    #[must_use]
    pub const fn new(options: WaitOptions) -> Self {
        Self { options }
    }

    /// Options in use
    #[must_use]
    pub const fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Report the current state with a single observation
    ///
    /// # Errors
    ///
    /// Returns an error if the session query fails.
    pub async fn observe<S: Session + ?Sized>(
        &self,
        session: &mut S,
        target: &ActivationTarget,
    ) -> ProbeResult<ActivationState> {
        if session.count(&target.polyfilled_selector()).await? > 0 {
            Ok(ActivationState::Active)
        } else {
            Ok(ActivationState::Pending)
        }
    }

    /// Wait until the first replacement element is present in the scope.
    ///
    /// A zero timeout makes exactly one observation. The page is never
    /// modified while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`CaseFailure::ActivationTimeout`] (as a `ProbeError::Case`)
    /// when the wait runs out, or any session error.
    pub async fn wait<S: Session + ?Sized>(
        &self,
        session: &mut S,
        target: &ActivationTarget,
    ) -> ProbeResult<ElementHandle> {
        let selector = target.polyfilled_selector();
        let mut poller = Poller::start(&self.options, selector.to_string());
        let mut checked_legacy = false;

        loop {
            if self.observe(session, target).await? == ActivationState::Active {
                let result = poller.succeed();
                tracing::info!(
                    selector = %selector,
                    elapsed_ms = result.elapsed_ms(),
                    polls = result.polls,
                    "polyfill active"
                );
                return Ok(ElementHandle::new(selector));
            }

            if !checked_legacy {
                checked_legacy = true;
                if session.count(&target.legacy_selector()).await? == 0 {
                    tracing::warn!(
                        scope = %target.scope(),
                        "neither a legacy tag nor a polyfilled element is present"
                    );
                }
            }

            tracing::debug!(polls = poller.polls(), "waiting for polyfill");
            if !poller.tick().await {
                let result = poller.time_out();
                return Err(CaseFailure::ActivationTimeout {
                    selector: selector.to_string(),
                    waited_ms: result.elapsed_ms(),
                    polls: result.polls,
                }
                .into());
            }
        }
    }
}
