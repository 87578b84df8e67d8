//! In-memory session with scripted behaviour.
//!
//! The page is plain HTML parsed with `scraper` on every query, so selectors
//! behave like they would in a browser. Activation and the content runtime
//! are scripted: after the polyfill is injected, the page swaps to its
//! activated markup once enough observations have been made, and playback
//! replays a fixed queue of trace chunks.

use async_trait::async_trait;
use scraper::{ElementRef, Html};
use std::collections::VecDeque;

use super::{Session, TraceChunk};
use crate::params::Parameters;
use crate::result::{ProbeError, ProbeResult};
use crate::selector::{ElementHandle, Selector};

/// What the content does once playback starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRuntime {
    /// Produces no trace output at all
    Silent,
    /// Replays these chunks, one per drain
    Chunks(Vec<String>),
    /// Traces `_level0.<name>` and `typeof(<name>)` for each name, in order
    EchoParameters(Vec<String>),
}

/// Scripted [`Session`] for deterministic tests
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    page: String,
    activated_page: Option<String>,
    activate_after: u32,
    injected: bool,
    observations_since_inject: u32,
    runtime: ScriptedRuntime,
    signals_completion: bool,
    pending: VecDeque<String>,
    playing: bool,
    navigation_error: Option<String>,
    opened_url: Option<String>,
    received: Option<Parameters>,
    call_history: Vec<String>,
}

impl ScriptedSession {
    /// Session showing `page` that never activates and traces nothing
    #[must_use]
    pub fn new(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            activated_page: None,
            activate_after: 0,
            injected: false,
            observations_since_inject: 0,
            runtime: ScriptedRuntime::Silent,
            signals_completion: true,
            pending: VecDeque::new(),
            playing: false,
            navigation_error: None,
            opened_url: None,
            received: None,
            call_history: Vec::new(),
        }
    }

    /// Swap to `page` once the polyfill is injected and `after` observations
    /// have seen the old markup
    #[must_use]
    pub fn with_activation(mut self, page: impl Into<String>, after: u32) -> Self {
        self.activated_page = Some(page.into());
        self.activate_after = after;
        self
    }

    /// Set the content runtime
    #[must_use]
    pub fn with_runtime(mut self, runtime: ScriptedRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Replay `chunks` as trace output
    #[must_use]
    pub fn with_trace_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_runtime(ScriptedRuntime::Chunks(
            chunks.into_iter().map(Into::into).collect(),
        ))
    }

    /// Echo the named parameters the way the flashvars content does
    #[must_use]
    pub fn with_parameter_echo<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_runtime(ScriptedRuntime::EchoParameters(
            names.into_iter().map(Into::into).collect(),
        ))
    }

    /// Whether the runtime reports completion once its output is exhausted
    #[must_use]
    pub const fn with_completion_signal(mut self, signals: bool) -> Self {
        self.signals_completion = signals;
        self
    }

    /// Make [`Session::open`] fail with `message`
    #[must_use]
    pub fn with_navigation_error(mut self, message: impl Into<String>) -> Self {
        self.navigation_error = Some(message.into());
        self
    }

    /// URL passed to the last [`Session::open`]
    #[must_use]
    pub fn opened_url(&self) -> Option<&str> {
        self.opened_url.as_deref()
    }

    /// Parameters the runtime received at playback start
    #[must_use]
    pub const fn received_parameters(&self) -> Option<&Parameters> {
        self.received.as_ref()
    }

    /// Whether the polyfill was injected
    #[must_use]
    pub const fn is_injected(&self) -> bool {
        self.injected
    }

    /// Whether the page shows its activated markup
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.injected
            && self.activated_page.is_some()
            && self.observations_since_inject > self.activate_after
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.call_history
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.call_history.iter().any(|c| c.starts_with(method))
    }

    fn observe(&mut self) {
        if self.injected {
            self.observations_since_inject = self.observations_since_inject.saturating_add(1);
        }
    }

    fn current_page(&self) -> &str {
        match &self.activated_page {
            Some(page) if self.is_activated() => page,
            _ => &self.page,
        }
    }

    fn script_output(&self, parameters: &Parameters) -> VecDeque<String> {
        match &self.runtime {
            ScriptedRuntime::Silent => VecDeque::new(),
            ScriptedRuntime::Chunks(chunks) => chunks.iter().cloned().collect(),
            ScriptedRuntime::EchoParameters(names) => names
                .iter()
                .map(|name| {
                    let (value, kind) = match parameters.get(name).and_then(|v| v.runtime_value()) {
                        Some(value) => (value, "string"),
                        None => ("undefined", "undefined"),
                    };
                    format!("// _level0.{name}\n{value}\n\n// typeof({name})\n{kind}\n\n")
                })
                .collect(),
        }
    }
}

fn parse_css(css: &str) -> ProbeResult<scraper::Selector> {
    scraper::Selector::parse(css).map_err(|e| ProbeError::InvalidSelector {
        selector: css.to_string(),
        message: format!("{e:?}"),
    })
}

fn resolve<'a>(doc: &'a Html, selector: &Selector) -> ProbeResult<Vec<ElementRef<'a>>> {
    match selector {
        Selector::Within { scope, css } => {
            let inner = parse_css(css)?;
            Ok(resolve(doc, scope)?
                .first()
                .map(|el| el.select(&inner).collect())
                .unwrap_or_default())
        }
        other => {
            let css = other.as_css().unwrap_or_default();
            let parsed = parse_css(&css)?;
            Ok(doc.select(&parsed).collect())
        }
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn open(&mut self, url: &str) -> ProbeResult<()> {
        self.call_history.push(format!("open:{url}"));
        if let Some(message) = &self.navigation_error {
            return Err(ProbeError::NavigationError {
                url: url.to_string(),
                message: message.clone(),
            });
        }
        self.opened_url = Some(url.to_string());
        Ok(())
    }

    async fn inject_polyfill(&mut self) -> ProbeResult<()> {
        self.call_history.push("inject_polyfill".to_string());
        self.injected = true;
        Ok(())
    }

    async fn count(&mut self, selector: &Selector) -> ProbeResult<usize> {
        self.call_history.push(format!("count:{selector}"));
        self.observe();
        let doc = Html::parse_document(self.current_page());
        Ok(resolve(&doc, selector)?.len())
    }

    async fn inner_html(&mut self, selector: &Selector) -> ProbeResult<Option<String>> {
        self.call_history.push(format!("inner_html:{selector}"));
        let doc = Html::parse_document(self.current_page());
        Ok(resolve(&doc, selector)?.first().map(ElementRef::inner_html))
    }

    async fn start_playback(
        &mut self,
        element: &ElementHandle,
        parameters: &Parameters,
    ) -> ProbeResult<()> {
        self.call_history.push(format!("start_playback:{element}"));
        let found = {
            let doc = Html::parse_document(self.current_page());
            !resolve(&doc, element.selector())?.is_empty()
        };
        if !found {
            return Err(ProbeError::ScriptError {
                message: format!("no element matches {element}"),
            });
        }
        self.pending = self.script_output(parameters);
        self.received = Some(parameters.clone());
        self.playing = true;
        Ok(())
    }

    async fn drain_trace(&mut self, element: &ElementHandle) -> ProbeResult<TraceChunk> {
        self.call_history.push(format!("drain_trace:{element}"));
        if !self.playing {
            return Ok(TraceChunk::default());
        }
        let chunk = TraceChunk::text(self.pending.pop_front().unwrap_or_default());
        if self.pending.is_empty() && self.signals_completion {
            Ok(chunk.completed())
        } else {
            Ok(chunk)
        }
    }

    async fn close(&mut self) -> ProbeResult<()> {
        self.call_history.push("close".to_string());
        self.playing = false;
        Ok(())
    }
}
