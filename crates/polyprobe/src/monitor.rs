//! Playback monitoring.
//!
//! Starts the content and collects its trace output until some completion
//! signal fires or the maximum wait runs out. Collection is append-only and
//! verbatim; the transcript is frozen exactly once, when the loop ends.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::params::Parameters;
use crate::result::{CaseFailure, ProbeResult};
use crate::selector::ElementHandle;
use crate::session::{Session, TraceChunk};
use crate::trace::{TraceBuffer, Transcript};
use crate::wait::{Poller, WaitOptions, DEFAULT_POLL_INTERVAL_MS};

/// Default maximum time to wait for playback to finish (30 seconds)
pub const DEFAULT_PLAYBACK_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// OPTIONS
// =============================================================================

/// Options for a playback run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    /// Maximum wait for a completion signal, in milliseconds
    pub max_wait_ms: u64,
    /// Drain interval in milliseconds
    pub poll_interval_ms: u64,
    /// Trace line that marks the end of the program's output
    pub end_marker: Option<String>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            max_wait_ms: DEFAULT_PLAYBACK_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            end_marker: None,
        }
    }
}

impl MonitorOptions {
    /// Create new options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum wait in milliseconds
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait_ms: u64) -> Self {
        self.max_wait_ms = max_wait_ms;
        self
    }

    /// Set the drain interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Stop as soon as a line equal to `marker` is collected
    #[must_use]
    pub fn with_end_marker(mut self, marker: impl Into<String>) -> Self {
        self.end_marker = Some(marker.into());
        self
    }

    /// Equivalent wait options for the poll loop
    #[must_use]
    pub const fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout_ms: self.max_wait_ms,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Why trace collection stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSignal {
    /// The runtime reported that the program finished
    Runtime,
    /// A collected line equalled the configured end marker
    EndMarker(String),
    /// At least this many bytes were collected, then a drain brought nothing new
    MinBytes(usize),
}

/// How trace collection ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// A completion signal was observed
    Signalled(CompletionSignal),
    /// The maximum wait elapsed first
    Incomplete,
}

/// Result of a playback run
#[derive(Debug, Clone)]
pub struct PlaybackOutcome {
    /// Everything collected, in production order
    pub transcript: Transcript,
    /// How collection ended
    pub completion: Completion,
    /// Time spent collecting
    pub elapsed: Duration,
    /// Number of drains performed
    pub drains: u32,
}

impl PlaybackOutcome {
    /// Whether a completion signal was observed
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.completion, Completion::Signalled(_))
    }

    /// The transcript, or [`CaseFailure::IncompletePlayback`] carrying it
    ///
    /// # Errors
    ///
    /// Fails if no completion signal was observed.
    pub fn require_complete(self) -> Result<Transcript, CaseFailure> {
        match self.completion {
            Completion::Signalled(_) => Ok(self.transcript),
            Completion::Incomplete => Err(CaseFailure::IncompletePlayback {
                waited_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
                partial: self.transcript,
            }),
        }
    }
}

// =============================================================================
// MONITOR
// =============================================================================

/// Drives playback and collects its trace
#[derive(Debug, Clone, Default)]
pub struct PlaybackMonitor {
    options: MonitorOptions,
    min_bytes: Option<usize>,
}

impl PlaybackMonitor {
    /// Create a monitor
    #[must_use]
    pub const fn new(options: MonitorOptions) -> Self {
        Self {
            options,
            min_bytes: None,
        }
    }

    /// Also stop once as many bytes as `expected` holds have been collected
    /// and the next drain comes back empty.
    ///
    /// Output that keeps arriving past that length is still collected, so a
    /// trace longer than `expected` fails comparison instead of being cut off.
    #[must_use]
    pub fn with_expected(mut self, expected: &Transcript) -> Self {
        self.min_bytes = Some(expected.byte_len()).filter(|n| *n > 0);
        self
    }

    /// Options in use
    #[must_use]
    pub const fn options(&self) -> &MonitorOptions {
        &self.options
    }

    fn completion_signal(&self, buffer: &TraceBuffer, chunk: &TraceChunk) -> Option<CompletionSignal> {
        if chunk.complete {
            return Some(CompletionSignal::Runtime);
        }
        if let Some(marker) = &self.options.end_marker {
            if buffer.contains_line(marker) {
                return Some(CompletionSignal::EndMarker(marker.clone()));
            }
        }
        match self.min_bytes {
            // An empty drain can only follow one that already reached `n`.
            Some(n) if chunk.text.is_empty() && buffer.byte_len() >= n => {
                Some(CompletionSignal::MinBytes(n))
            }
            _ => None,
        }
    }

    /// Start playback of `element` and collect its trace.
    ///
    /// A missing completion signal is not an error here; it is reported as
    /// [`Completion::Incomplete`] with whatever was collected.
    ///
    /// # Errors
    ///
    /// Returns an error if the session fails to start playback or drain.
    pub async fn run<S: Session + ?Sized>(
        &self,
        session: &mut S,
        element: &ElementHandle,
        parameters: &Parameters,
    ) -> ProbeResult<PlaybackOutcome> {
        session.start_playback(element, parameters).await?;
        tracing::debug!(%element, parameters = parameters.len(), "playback started");

        let mut buffer = TraceBuffer::new();
        let mut poller = Poller::start(&self.options.wait_options(), format!("playback of {element}"));

        loop {
            let chunk = session.drain_trace(element).await?;
            buffer.push(&chunk.text);
            tracing::debug!(
                bytes = buffer.byte_len(),
                drain = poller.polls(),
                "trace drained"
            );

            if let Some(signal) = self.completion_signal(&buffer, &chunk) {
                let result = poller.succeed();
                tracing::debug!(?signal, elapsed_ms = result.elapsed_ms(), "playback complete");
                return Ok(PlaybackOutcome {
                    transcript: buffer.freeze(),
                    completion: Completion::Signalled(signal),
                    elapsed: result.elapsed,
                    drains: result.polls,
                });
            }

            if !poller.tick().await {
                let result = poller.time_out();
                tracing::warn!(
                    elapsed_ms = result.elapsed_ms(),
                    bytes = buffer.byte_len(),
                    "no completion signal before the maximum wait"
                );
                return Ok(PlaybackOutcome {
                    transcript: buffer.freeze(),
                    completion: Completion::Incomplete,
                    elapsed: result.elapsed,
                    drains: result.polls,
                });
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::selector::Selector;
    use crate::session::ScriptedSession;

    const ACTIVE: &str = r#"<div id="test-container"><ruffle-embed></ruffle-embed></div>"#;

    fn element() -> ElementHandle {
        ElementHandle::new(Selector::css("#test-container").within("ruffle-embed"))
    }

    fn fast() -> MonitorOptions {
        MonitorOptions::new().with_max_wait(200).with_poll_interval(1)
    }

    mod options_tests {
        use super::*;

        #[test]
        fn test_defaults_and_builders() {
            let opts = MonitorOptions::default();
            assert_eq!(opts.max_wait_ms, DEFAULT_PLAYBACK_TIMEOUT_MS);
            assert!(opts.end_marker.is_none());
            let opts = opts.with_max_wait(10).with_end_marker("END");
            assert_eq!(opts.wait_options().timeout_ms, 10);
            assert_eq!(opts.end_marker.as_deref(), Some("END"));
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn test_runtime_signal_collects_all_chunks_in_order() {
            let mut session = ScriptedSession::new(ACTIVE).with_trace_chunks(["a\n", "b", "\nc\n"]);
            let outcome = PlaybackMonitor::new(fast())
                .run(&mut session, &element(), &Parameters::new())
                .await
                .unwrap();
            assert_eq!(outcome.completion, Completion::Signalled(CompletionSignal::Runtime));
            assert_eq!(outcome.transcript.as_str(), "a\nb\nc\n");
            assert_eq!(outcome.drains, 3);
        }

        #[tokio::test]
        async fn test_end_marker_stops_early() {
            let mut session = ScriptedSession::new(ACTIVE)
                .with_trace_chunks(["x\nEND\n", "late\n"])
                .with_completion_signal(false);
            let outcome = PlaybackMonitor::new(fast().with_end_marker("END"))
                .run(&mut session, &element(), &Parameters::new())
                .await
                .unwrap();
            assert_eq!(
                outcome.completion,
                Completion::Signalled(CompletionSignal::EndMarker("END".into()))
            );
            assert_eq!(outcome.transcript.as_str(), "x\nEND\n");
        }

        #[tokio::test]
        async fn test_min_bytes_waits_for_a_quiet_drain() {
            let mut session = ScriptedSession::new(ACTIVE)
                .with_trace_chunks(["12", "34"])
                .with_completion_signal(false);
            let expected = Transcript::from_text("1234");
            let outcome = PlaybackMonitor::new(fast())
                .with_expected(&expected)
                .run(&mut session, &element(), &Parameters::new())
                .await
                .unwrap();
            assert_eq!(
                outcome.completion,
                Completion::Signalled(CompletionSignal::MinBytes(4))
            );
            assert_eq!(outcome.transcript.as_str(), "1234");
            assert_eq!(outcome.drains, 3);
        }

        #[tokio::test]
        async fn test_output_past_expected_length_is_collected() {
            let mut session = ScriptedSession::new(ACTIVE)
                .with_trace_chunks(["// x\n1\n\n", "// extra\nunexpected\n"])
                .with_completion_signal(false);
            let expected = Transcript::from_text("// x\n1\n\n");
            let outcome = PlaybackMonitor::new(fast())
                .with_expected(&expected)
                .run(&mut session, &element(), &Parameters::new())
                .await
                .unwrap();
            assert_eq!(
                outcome.completion,
                Completion::Signalled(CompletionSignal::MinBytes(8))
            );
            assert_eq!(
                outcome.transcript.as_str(),
                "// x\n1\n\n// extra\nunexpected\n"
            );
        }

        #[tokio::test]
        async fn test_runtime_signal_beats_min_bytes() {
            let mut session =
                ScriptedSession::new(ACTIVE).with_trace_chunks(["1234", "more"]);
            let outcome = PlaybackMonitor::new(fast())
                .with_expected(&Transcript::from_text("1234"))
                .run(&mut session, &element(), &Parameters::new())
                .await
                .unwrap();
            assert_eq!(outcome.completion, Completion::Signalled(CompletionSignal::Runtime));
            assert_eq!(outcome.transcript.as_str(), "1234more");
        }

        #[tokio::test]
        async fn test_timeout_reports_partial_transcript() {
            let mut session = ScriptedSession::new(ACTIVE)
                .with_trace_chunks(["partial\n"])
                .with_completion_signal(false);
            let outcome = PlaybackMonitor::new(MonitorOptions::new().with_max_wait(30).with_poll_interval(5))
                .run(&mut session, &element(), &Parameters::new())
                .await
                .unwrap();
            assert!(!outcome.is_complete());
            match outcome.require_complete() {
                Err(CaseFailure::IncompletePlayback { partial, waited_ms }) => {
                    assert_eq!(partial.as_str(), "partial\n");
                    assert!(waited_ms >= 30);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_zero_wait_drains_once() {
            let mut session = ScriptedSession::new(ACTIVE)
                .with_trace_chunks(["one\n", "two\n"])
                .with_completion_signal(false);
            let outcome = PlaybackMonitor::new(MonitorOptions::new().with_max_wait(0))
                .run(&mut session, &element(), &Parameters::new())
                .await
                .unwrap();
            assert_eq!(outcome.completion, Completion::Incomplete);
            assert_eq!(outcome.drains, 1);
            assert_eq!(outcome.transcript.as_str(), "one\n");
        }

        #[tokio::test]
        async fn test_missing_element_is_an_error() {
            let mut session = ScriptedSession::new("<div id=\"test-container\"></div>");
            assert!(PlaybackMonitor::new(fast())
                .run(&mut session, &element(), &Parameters::new())
                .await
                .is_err());
        }
    }
}
