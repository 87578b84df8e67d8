//! Test harness for running golden cases.
//!
//! Per case: open the fixture page, inject the polyfill, wait for activation,
//! compare the container's DOM against the snapshot, then play the content
//! and compare its trace. Activation failure ends the case; a DOM mismatch
//! does not stop playback. Every failure is both logged and recorded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use url::Url;
use uuid::Uuid;

use crate::activation::{ActivationState, ActivationTarget, ActivationWaiter};
use crate::compare::ComparisonResult;
use crate::config::HarnessConfig;
use crate::dom::DomComparator;
use crate::fixture::{FixtureStore, TestCase};
use crate::monitor::{Completion, PlaybackMonitor};
use crate::result::{CaseFailure, ProbeError, ProbeResult};
use crate::session::Session;
use crate::trace::{TraceComparator, Transcript};

// =============================================================================
// CASE REPORT
// =============================================================================

/// Outcome of one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    /// Unique id of this run of the case
    pub run_id: Uuid,
    /// Case identifier
    pub case_id: String,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Time spent on the case in milliseconds
    pub duration_ms: u64,
    /// How far activation got
    pub activation: ActivationState,
    /// How trace collection ended, if playback ran
    pub completion: Option<Completion>,
    /// Collected trace, if playback ran
    pub transcript: Option<Transcript>,
    /// Every failure, in the order it was found
    pub failures: Vec<CaseFailure>,
}

impl CaseReport {
    fn start(case_id: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            case_id: case_id.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            activation: ActivationState::Pending,
            completion: None,
            transcript: None,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, failure: CaseFailure) {
        tracing::error!(case = %self.case_id, kind = failure.kind(), "{failure}");
        self.failures.push(failure);
    }

    fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Whether the case passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures of one kind (see [`CaseFailure::kind`])
    #[must_use]
    pub fn failures_of(&self, kind: &str) -> Vec<&CaseFailure> {
        self.failures.iter().filter(|f| f.kind() == kind).collect()
    }

    /// `Ok` if the case passed, otherwise every failure
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::CaseFailed`] carrying all failures.
    pub fn into_result(self) -> ProbeResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::CaseFailed {
                case: self.case_id,
                failures: self.failures,
            })
        }
    }

    /// Panic with every diagnostic unless the case passed
    pub fn assert_passed(&self) {
        if self.passed() {
            return;
        }
        let details: Vec<String> = self
            .failures
            .iter()
            .enumerate()
            .map(|(i, f)| format!("[{}] {f}", i + 1))
            .collect();
        panic!(
            "case {} failed with {} failure(s):\n{}",
            self.case_id,
            self.failures.len(),
            details.join("\n")
        );
    }
}

// =============================================================================
// SUITE RESULTS
// =============================================================================

/// Results from running a set of cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResults {
    /// Suite name
    pub suite_name: String,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Reports in case order
    pub reports: Vec<CaseReport>,
    /// Cases not run because of fail-fast
    pub skipped: Vec<String>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl SuiteResults {
    /// Check if all cases passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(CaseReport::passed)
    }

    /// Count passed cases
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    /// Count failed cases
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| !r.passed()).count()
    }

    /// Get total case count, skipped ones included
    #[must_use]
    pub fn total(&self) -> usize {
        self.reports.len() + self.skipped.len()
    }

    /// Get failed cases
    #[must_use]
    pub fn failures(&self) -> Vec<&CaseReport> {
        self.reports.iter().filter(|r| !r.passed()).collect()
    }

    /// Look up a report by case id
    #[must_use]
    pub fn report(&self, case_id: &str) -> Option<&CaseReport> {
        self.reports.iter().find(|r| r.case_id == case_id)
    }

    /// One-paragraph text summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{}: {} passed, {} failed, {} skipped ({} ms)",
            self.suite_name,
            self.passed_count(),
            self.failed_count(),
            self.skipped.len(),
            self.duration_ms
        );
        for report in self.failures() {
            let kinds: Vec<&str> = report.failures.iter().map(CaseFailure::kind).collect();
            out.push_str(&format!("\n  FAIL {} [{}]", report.case_id, kinds.join(", ")));
        }
        out
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProbeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON report to `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_json(&self, path: impl AsRef<Path>) -> ProbeResult<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

// =============================================================================
// SESSION FACTORY
// =============================================================================

/// Creates one fresh session per case
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session for `case`
    async fn create(&self, case: &TestCase) -> ProbeResult<Box<dyn Session>>;
}

#[async_trait]
impl<F> SessionFactory for F
where
    F: Fn(&TestCase) -> ProbeResult<Box<dyn Session>> + Send + Sync,
{
    async fn create(&self, case: &TestCase) -> ProbeResult<Box<dyn Session>> {
        self(case)
    }
}

// =============================================================================
// TEST HARNESS
// =============================================================================

/// Runs golden cases against sessions
#[derive(Debug, Clone)]
pub struct TestHarness {
    config: HarnessConfig,
    base_url: Url,
    target: ActivationTarget,
    dom: DomComparator,
}

impl TestHarness {
    /// Create a harness from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: HarnessConfig) -> ProbeResult<Self> {
        config.validate()?;
        Ok(Self {
            base_url: config.base_url()?,
            target: config.target(),
            dom: DomComparator::new(config.normalizer()?),
            config,
        })
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one case on `session`. Never fails: problems end up in the report.
    #[tracing::instrument(skip_all, fields(case = %case.id()))]
    pub async fn run_case<S: Session + ?Sized>(&self, session: &mut S, case: &TestCase) -> CaseReport {
        let started = Instant::now();
        let mut report = CaseReport::start(case.id());
        tracing::info!("case started");

        self.drive(session, case, &mut report).await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "closing session failed");
        }

        let report = report.finish(started);
        if report.passed() {
            tracing::info!(duration_ms = report.duration_ms, "case passed");
        } else {
            tracing::info!(
                duration_ms = report.duration_ms,
                failures = report.failures.len(),
                "case failed"
            );
        }
        report
    }

    async fn drive<S: Session + ?Sized>(&self, session: &mut S, case: &TestCase, report: &mut CaseReport) {
        // Load fixture
        let url = match case.page_url(&self.base_url) {
            Ok(url) => url,
            Err(e) => return report.record(e.into_case_failure("open")),
        };
        if let Err(e) = session.open(url.as_str()).await {
            return report.record(e.into_case_failure("open"));
        }
        if let Err(e) = session.inject_polyfill().await {
            return report.record(e.into_case_failure("inject"));
        }

        // Activation
        let mut wait = self.config.activation.clone();
        if let Some(ms) = case.options().activation_timeout_ms {
            wait.timeout_ms = ms;
        }
        let element = match ActivationWaiter::new(wait).wait(session, &self.target).await {
            Ok(element) => {
                report.activation = ActivationState::Active;
                element
            }
            Err(e) => {
                if matches!(e, ProbeError::Case(CaseFailure::ActivationTimeout { .. })) {
                    report.activation = ActivationState::TimedOut;
                }
                return report.record(e.into_case_failure("activate"));
            }
        };

        // DOM snapshot
        let scope = self.target.scope();
        match session.inner_html(scope).await {
            Ok(Some(live)) => {
                if let ComparisonResult::Unequal(diff) = self.dom.compare(&live, case.expected_html()) {
                    report.record(CaseFailure::DomMismatch {
                        scope: scope.to_string(),
                        diff: diff.diff,
                    });
                }
            }
            Ok(None) => report.record(CaseFailure::Session {
                stage: "snapshot".to_string(),
                message: format!("{scope} is no longer in the document"),
            }),
            Err(e) => report.record(e.into_case_failure("snapshot")),
        }

        // Playback
        let Some(expected) = case.expected_trace() else {
            tracing::debug!("no golden trace, skipping playback");
            return;
        };
        let mut options = self.config.playback.clone();
        if let Some(ms) = case.options().playback_timeout_ms {
            options.max_wait_ms = ms;
        }
        if let Some(marker) = &case.options().end_marker {
            options.end_marker = Some(marker.clone());
        }
        let monitor = PlaybackMonitor::new(options).with_expected(expected);
        let outcome = match monitor.run(session, &element, case.parameters()).await {
            Ok(outcome) => outcome,
            Err(e) => return report.record(e.into_case_failure("playback")),
        };
        report.completion = Some(outcome.completion.clone());
        report.transcript = Some(outcome.transcript.clone());

        match outcome.require_complete() {
            Ok(actual) => {
                if let ComparisonResult::Unequal(mismatch) =
                    TraceComparator::new().compare(&actual, expected)
                {
                    report.record(CaseFailure::TraceMismatch(mismatch));
                }
            }
            Err(incomplete) => report.record(incomplete),
        }
    }

    async fn run_with_factory(&self, case: &TestCase, factory: &dyn SessionFactory) -> CaseReport {
        match factory.create(case).await {
            Ok(mut session) => self.run_case(&mut session, case).await,
            Err(e) => {
                let mut report = CaseReport::start(case.id());
                report.record(e.into_case_failure("session"));
                report
            }
        }
    }

    /// Run `cases`, one fresh session each.
    ///
    /// With `parallel_jobs > 1` up to that many cases run at once; reports
    /// keep the input order either way. `fail_fast` applies to serial runs.
    pub async fn run_suite(
        &self,
        name: &str,
        cases: &[TestCase],
        factory: &dyn SessionFactory,
    ) -> SuiteResults {
        let started_at = Utc::now();
        let started = Instant::now();
        let jobs = self.config.parallel_jobs.max(1);
        tracing::info!(suite = name, cases = cases.len(), jobs, "suite started");

        let mut reports = Vec::with_capacity(cases.len());
        let mut skipped = Vec::new();

        if jobs == 1 {
            let mut stop = false;
            for case in cases {
                if stop {
                    skipped.push(case.id().to_string());
                    continue;
                }
                let report = self.run_with_factory(case, factory).await;
                stop = self.config.fail_fast && !report.passed();
                reports.push(report);
            }
        } else {
            let mut indexed: Vec<(usize, CaseReport)> = futures::stream::iter(
                cases.iter().enumerate().map(|(i, case)| async move {
                    (i, self.run_with_factory(case, factory).await)
                }),
            )
            .buffer_unordered(jobs)
            .collect()
            .await;
            indexed.sort_by_key(|(i, _)| *i);
            reports.extend(indexed.into_iter().map(|(_, r)| r));
        }

        let results = SuiteResults {
            suite_name: name.to_string(),
            started_at,
            reports,
            skipped,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            suite = name,
            passed = results.passed_count(),
            failed = results.failed_count(),
            skipped = results.skipped.len(),
            "suite finished"
        );
        results
    }

    /// Run every case of a fixture store
    pub async fn run_store(&self, store: &FixtureStore, factory: &dyn SessionFactory) -> SuiteResults {
        let name = store.root().display().to_string();
        self.run_suite(&name, store.cases(), factory).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::session::ScriptedSession;
    use crate::wait::WaitOptions;

    const LEGACY: &str = r#"<div id="test-container"><embed src="test.swf"></div>"#;
    const ACTIVE: &str = r#"<div id="test-container"><ruffle-embed src="test.swf"></ruffle-embed></div>"#;
    const GOLDEN: &str = r#"<ruffle-embed src="test.swf"></ruffle-embed>"#;

    fn harness() -> TestHarness {
        TestHarness::new(
            HarnessConfig::new()
                .with_activation(WaitOptions::new().with_timeout(500).with_poll_interval(1))
                .with_playback(crate::monitor::MonitorOptions::new().with_max_wait(200).with_poll_interval(1)),
        )
        .unwrap()
    }

    mod report_tests {
        use super::*;

        #[test]
        fn test_into_result_and_assert() {
            let report = CaseReport::start("ok");
            assert!(report.passed());
            report.assert_passed();
            assert!(report.clone().into_result().is_ok());

            let mut failing = CaseReport::start("bad");
            failing.record(CaseFailure::Session {
                stage: "open".into(),
                message: "refused".into(),
            });
            assert_eq!(failing.failures_of("session").len(), 1);
            match failing.into_result() {
                Err(ProbeError::CaseFailed { case, failures }) => {
                    assert_eq!(case, "bad");
                    assert_eq!(failures.len(), 1);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        #[should_panic(expected = "case bad failed with 1 failure(s)")]
        fn test_assert_passed_panics_with_diagnostics() {
            let mut report = CaseReport::start("bad");
            report.record(CaseFailure::ActivationTimeout {
                selector: "x".into(),
                waited_ms: 0,
                polls: 1,
            });
            report.assert_passed();
        }
    }

    mod run_case_tests {
        use super::*;

        #[tokio::test]
        async fn test_dom_only_case_passes() {
            let mut session = ScriptedSession::new(LEGACY).with_activation(ACTIVE, 1);
            let case = TestCase::new("dom_only", GOLDEN);
            let report = harness().run_case(&mut session, &case).await;
            report.assert_passed();
            assert_eq!(report.activation, ActivationState::Active);
            assert!(report.completion.is_none());
            assert_eq!(
                session.opened_url(),
                Some("http://localhost:4000/dom_only/index.html")
            );
            assert!(session.was_called("close"));
        }

        #[tokio::test]
        async fn test_dom_mismatch_does_not_stop_playback() {
            let mut session = ScriptedSession::new(LEGACY)
                .with_activation(ACTIVE, 0)
                .with_trace_chunks(["hello\n"]);
            let case = TestCase::new("mismatch", "<ruffle-object></ruffle-object>")
                .with_expected_trace("hello\n");
            let report = harness().run_case(&mut session, &case).await;
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].kind(), "dom_mismatch");
            assert!(report.transcript.is_some());
        }

        #[tokio::test]
        async fn test_navigation_failure_is_a_session_failure() {
            let mut session = ScriptedSession::new(LEGACY).with_navigation_error("refused");
            let report = harness().run_case(&mut session, &TestCase::new("nav", GOLDEN)).await;
            assert_eq!(report.failures_of("session").len(), 1);
            assert_eq!(report.activation, ActivationState::Pending);
            assert!(!session.was_called("inject_polyfill"));
        }

        #[tokio::test]
        async fn test_extra_output_after_golden_length_fails() {
            let mut session = ScriptedSession::new(ACTIVE)
                .with_trace_chunks(["x", "\nmore"])
                .with_completion_signal(false);
            let case = TestCase::new("chatty", GOLDEN).with_expected_trace("x");
            let report = harness().run_case(&mut session, &case).await;

            assert_eq!(report.transcript.as_ref().map(Transcript::as_str), Some("x\nmore"));
            assert_eq!(report.failures.len(), 1);
            match &report.failures[0] {
                CaseFailure::TraceMismatch(mismatch) => {
                    assert_eq!(mismatch.index, 1);
                    assert_eq!(mismatch.expected, None);
                    assert_eq!(mismatch.actual.as_deref(), Some("more"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_incomplete_playback_skips_trace_comparison() {
            let mut session = ScriptedSession::new(ACTIVE)
                .with_trace_chunks(["par"])
                .with_completion_signal(false);
            let case = TestCase::new("slow", GOLDEN).with_expected_trace("partial\n");
            let report = harness().run_case(&mut session, &case).await;
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].kind(), "incomplete_playback");
            assert_eq!(report.completion, Some(Completion::Incomplete));
        }
    }

    mod suite_tests {
        use super::*;

        fn factory(case: &TestCase) -> ProbeResult<Box<dyn Session>> {
            let page = if case.id().starts_with("broken") { LEGACY } else { ACTIVE };
            Ok(Box::new(ScriptedSession::new(page)))
        }

        fn cases() -> Vec<TestCase> {
            vec![
                TestCase::new("a", GOLDEN),
                TestCase::new("broken", GOLDEN),
                TestCase::new("c", GOLDEN),
            ]
        }

        fn quick(config: HarnessConfig) -> TestHarness {
            TestHarness::new(config.with_activation(WaitOptions::new().with_timeout(0))).unwrap()
        }

        #[tokio::test]
        async fn test_serial_suite_counts() {
            let results = quick(HarnessConfig::new()).run_suite("s", &cases(), &factory).await;
            assert_eq!(results.total(), 3);
            assert_eq!(results.passed_count(), 2);
            assert_eq!(results.failed_count(), 1);
            assert!(results.summary().contains("FAIL broken [activation_timeout]"));
        }

        #[tokio::test]
        async fn test_fail_fast_skips_rest() {
            let results = quick(HarnessConfig::new().with_fail_fast(true))
                .run_suite("s", &cases(), &factory)
                .await;
            assert_eq!(results.reports.len(), 2);
            assert_eq!(results.skipped, vec!["c".to_string()]);
        }

        #[tokio::test]
        async fn test_parallel_keeps_order() {
            let results = quick(HarnessConfig::new().with_parallel_jobs(3))
                .run_suite("p", &cases(), &factory)
                .await;
            let ids: Vec<&str> = results.reports.iter().map(|r| r.case_id.as_str()).collect();
            assert_eq!(ids, vec!["a", "broken", "c"]);
            assert!(!results.all_passed());
        }

        #[tokio::test]
        async fn test_factory_failure_recorded() {
            let failing = |_: &TestCase| -> ProbeResult<Box<dyn Session>> {
                Err(ProbeError::BrowserLaunchError {
                    message: "no chromium".into(),
                })
            };
            let results = quick(HarnessConfig::new())
                .run_suite("f", &[TestCase::new("x", GOLDEN)], &failing)
                .await;
            assert_eq!(results.reports[0].failures_of("session").len(), 1);
        }

        #[tokio::test]
        async fn test_save_json() {
            let results = quick(HarnessConfig::new()).run_suite("j", &cases(), &factory).await;
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("report.json");
            results.save_json(&path).unwrap();
            let back: SuiteResults =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(back.reports.len(), 3);
            assert_eq!(back.reports[1].failures[0].kind(), "activation_timeout");
        }
    }
}
