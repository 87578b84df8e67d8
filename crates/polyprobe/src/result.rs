//! Result and error types for Polyprobe.
//!
//! Two layers: [`ProbeError`] covers infrastructure problems (I/O, bad
//! fixtures, browser plumbing), while [`CaseFailure`] is the oracle's verdict
//! on a single test case. A case report may carry several verdicts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::TextDiff;
use crate::trace::{TraceMismatch, Transcript};

/// Result type for Polyprobe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Oracle verdicts that fail a test case.
///
/// Every variant is terminal for the case it was raised in. None of them are
/// retried by the harness.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseFailure {
    /// The polyfilled element never appeared
    #[error("Polyfill did not activate: no element matched {selector} after {waited_ms}ms ({polls} polls)")]
    ActivationTimeout {
        /// Selector that was polled
        selector: String,
        /// Time spent waiting
        waited_ms: u64,
        /// Number of observations made
        polls: u32,
    },

    /// Live DOM differs from the golden snapshot after normalization
    #[error("DOM mismatch in {scope}:\n{diff}")]
    DomMismatch {
        /// Scope whose inner HTML was compared
        scope: String,
        /// Line diff between the normalized forms (expected vs actual)
        diff: TextDiff,
    },

    /// No completion signal was observed within the maximum wait
    #[error("Playback incomplete after {waited_ms}ms: collected {} line(s) without a completion signal", .partial.len())]
    IncompletePlayback {
        /// Time spent collecting
        waited_ms: u64,
        /// Whatever was collected before giving up
        partial: Transcript,
    },

    /// Collected transcript diverges from the expected transcript
    #[error("Trace mismatch: {0}")]
    TraceMismatch(TraceMismatch),

    /// The browser collaborator failed while driving the case
    #[error("Session failure during {stage}: {message}")]
    Session {
        /// Harness stage (open, inject, activate, snapshot, playback)
        stage: String,
        /// Error message
        message: String,
    },
}

impl CaseFailure {
    /// Short machine-readable name of the failure kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ActivationTimeout { .. } => "activation_timeout",
            Self::DomMismatch { .. } => "dom_mismatch",
            Self::IncompletePlayback { .. } => "incomplete_playback",
            Self::TraceMismatch(_) => "trace_mismatch",
            Self::Session { .. } => "session",
        }
    }
}

/// Errors that can occur in Polyprobe
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunchError {
        /// Error message
        message: String,
    },

    /// Page error
    #[error("Page error: {message}")]
    PageError {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    NavigationError {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Script evaluation inside the page failed
    #[error("Script evaluation failed: {message}")]
    ScriptError {
        /// Error message
        message: String,
    },

    /// CSS selector could not be parsed
    #[error("Invalid selector {selector:?}: {message}")]
    InvalidSelector {
        /// Offending selector
        selector: String,
        /// Parser message
        message: String,
    },

    /// Fixture error (missing or malformed golden files)
    #[error("Fixture error in {path}: {message}")]
    FixtureError {
        /// Fixture path
        path: String,
        /// Error message
        message: String,
    },

    /// Invalid harness configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// URL could not be parsed or joined
    #[error("Invalid URL {url:?}: {message}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Error message
        message: String,
    },

    /// An oracle verdict raised as an error
    #[error(transparent)]
    Case(#[from] CaseFailure),

    /// A test case finished with one or more failures
    #[error("Test case {case} failed with {} failure(s)", .failures.len())]
    CaseFailed {
        /// Case identifier
        case: String,
        /// Every failure recorded for the case
        failures: Vec<CaseFailure>,
    },

    /// Ignore-policy pattern error
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ProbeError {
    /// Convert an infrastructure error into a session verdict for `stage`
    #[must_use]
    pub fn into_case_failure(self, stage: &str) -> CaseFailure {
        match self {
            Self::Case(failure) => failure,
            other => CaseFailure::Session {
                stage: stage.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let timeout = CaseFailure::ActivationTimeout {
            selector: "ruffle-embed".into(),
            waited_ms: 0,
            polls: 1,
        };
        assert_eq!(timeout.kind(), "activation_timeout");
        assert!(timeout.to_string().contains("ruffle-embed"));
    }

    #[test]
    fn test_into_case_failure_keeps_verdicts() {
        let verdict = CaseFailure::ActivationTimeout {
            selector: "x".into(),
            waited_ms: 5,
            polls: 2,
        };
        let err = ProbeError::Case(verdict.clone());
        assert_eq!(err.into_case_failure("activate"), verdict);
    }

    #[test]
    fn test_into_case_failure_wraps_infrastructure() {
        let err = ProbeError::ScriptError {
            message: "boom".into(),
        };
        match err.into_case_failure("playback") {
            CaseFailure::Session { stage, message } => {
                assert_eq!(stage, "playback");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_case_failure_serializes_with_kind_tag() {
        let failure = CaseFailure::Session {
            stage: "open".into(),
            message: "refused".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "session");
        assert_eq!(json["stage"], "open");
    }
}
