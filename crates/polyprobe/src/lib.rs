//! Polyprobe: golden-file regression harness for plugin polyfills
//!
//! A polyfill replaces legacy `<object>`/`<embed>` tags with its own player
//! element. Polyprobe loads a fixture page, injects the polyfill, waits for the
//! replacement to appear, and then checks two independent surfaces against
//! golden files: the resulting DOM, and the trace output of the content the
//! player runs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │ FixtureStore │──►│ Activation │──►│ DOM oracle │──►│ Playback   │──►│ Trace      │
//! │ (golden)     │   │ Waiter     │   │ (normalize)│   │ Monitor    │   │ oracle     │
//! └──────────────┘   └─────┬──────┘   └─────┬──────┘   └─────┬──────┘   └────────────┘
//!                          │                │                │
//!                          ▼                ▼                ▼
//!                    ┌──────────────────────────────────────────┐
//!                    │ Session (ScriptedSession / CdpSession)   │
//!                    └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use polyprobe::prelude::*;
//!
//! let store = FixtureStore::discover("tests/fixtures")?;
//! let harness = TestHarness::new(HarnessConfig::load("polyprobe.yaml")?.with_env_overrides()?)?;
//! let results = harness.run_store(&store, &factory).await;
//! assert!(results.all_passed(), "{}", results.summary());
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod activation;
mod browser;
mod compare;
#[allow(clippy::missing_errors_doc)]
mod config;
mod diff;
#[allow(clippy::doc_markdown)]
mod dom;
mod fixture;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod harness;
/// Log output setup
pub mod logging;
mod monitor;
mod params;
mod result;
mod selector;
/// Browser session abstraction and the in-memory scripted session
pub mod session;
mod trace;
mod wait;

pub use activation::{
    ActivationState, ActivationTarget, ActivationWaiter, DEFAULT_LEGACY, DEFAULT_POLYFILLED,
    DEFAULT_SCOPE,
};
#[cfg(feature = "browser")]
pub use browser::CdpSession;
pub use browser::{Browser, BrowserConfig};
pub use compare::ComparisonResult;
pub use config::{
    HarnessConfig, PolyfillConfig, SelectorConfig, DEFAULT_BASE_URL, ENV_BASE_URL, ENV_TIMEOUT_MS,
};
pub use diff::{DiffLine, DiffTag, TextDiff, DEFAULT_CONTEXT_LINES};
pub use dom::{
    DomComparator, DomDiff, HtmlNormalizer, IgnorePolicy, IgnorePolicyKind, NormalizedHtml,
    NormalizedNode, MASK,
};
pub use fixture::{
    CaseOptions, FixtureStore, TestCase, CASE_FILE, EXPECTED_HTML_FILE, EXPECTED_TRACE_FILE,
    PAGE_FILE,
};
pub use harness::{CaseReport, SessionFactory, SuiteResults, TestHarness};
pub use monitor::{
    Completion, CompletionSignal, MonitorOptions, PlaybackMonitor, PlaybackOutcome,
    DEFAULT_PLAYBACK_TIMEOUT_MS,
};
pub use params::{ParamValue, Parameters};
pub use result::{CaseFailure, ProbeError, ProbeResult};
pub use selector::{ElementHandle, Selector};
pub use session::{ScriptedRuntime, ScriptedSession, Session, TraceChunk};
pub use trace::{
    TraceBuffer, TraceComparator, TraceDocument, TraceField, TraceMismatch, Transcript,
    LABEL_PREFIX,
};
pub use wait::{
    Poller, WaitOptions, WaitResult, DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        ActivationState, ActivationTarget, ActivationWaiter, CaseFailure, CaseReport,
        ComparisonResult, Completion, CompletionSignal, DomComparator, ElementHandle,
        FixtureStore, HarnessConfig, HtmlNormalizer, IgnorePolicy, IgnorePolicyKind,
        MonitorOptions, ParamValue, Parameters, PlaybackMonitor, ProbeError, ProbeResult,
        ScriptedSession, Selector, Session, SessionFactory, SuiteResults, TestCase, TestHarness,
        TraceComparator, Transcript, WaitOptions,
    };
}
