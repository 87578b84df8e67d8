//! Browser session abstraction.
//!
//! The harness never touches a browser directly. Everything it needs from the
//! live page goes through [`Session`]: load the fixture, inject the polyfill,
//! query the DOM, start playback and drain trace output.
//!
//! # Implementations
//!
//! - [`ScriptedSession`] - in-memory page with scripted activation and runtime
//! - `CdpSession` - real Chromium over CDP (feature `browser`)

mod scripted;

pub use scripted::{ScriptedRuntime, ScriptedSession};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::params::Parameters;
use crate::result::ProbeResult;
use crate::selector::{ElementHandle, Selector};

/// Trace output drained from the side channel since the previous drain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceChunk {
    /// New output, verbatim
    pub text: String,
    /// Whether the runtime reports that the program finished
    pub complete: bool,
}

impl TraceChunk {
    /// Chunk with text and no completion signal
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            complete: false,
        }
    }

    /// Mark the chunk as carrying the completion signal
    #[must_use]
    pub const fn completed(mut self) -> Self {
        self.complete = true;
        self
    }
}

/// One live browser page, exclusively owned by one test case.
///
/// All methods are observations except [`Session::open`] and
/// [`Session::inject_polyfill`], which are the only mutations the harness
/// issues.
#[async_trait]
pub trait Session: Send {
    /// Load the fixture page
    async fn open(&mut self, url: &str) -> ProbeResult<()>;

    /// Load the polyfill script into the page
    async fn inject_polyfill(&mut self) -> ProbeResult<()>;

    /// Number of elements matching `selector`
    async fn count(&mut self, selector: &Selector) -> ProbeResult<usize>;

    /// Serialized inner HTML of the first element matching `selector`
    async fn inner_html(&mut self, selector: &Selector) -> ProbeResult<Option<String>>;

    /// Start the content in `element` with `parameters`
    async fn start_playback(
        &mut self,
        element: &ElementHandle,
        parameters: &Parameters,
    ) -> ProbeResult<()>;

    /// Take whatever trace output was produced since the last drain
    async fn drain_trace(&mut self, element: &ElementHandle) -> ProbeResult<TraceChunk>;

    /// Release the page
    async fn close(&mut self) -> ProbeResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<S: Session + ?Sized> Session for Box<S> {
    async fn open(&mut self, url: &str) -> ProbeResult<()> {
        (**self).open(url).await
    }

    async fn inject_polyfill(&mut self) -> ProbeResult<()> {
        (**self).inject_polyfill().await
    }

    async fn count(&mut self, selector: &Selector) -> ProbeResult<usize> {
        (**self).count(selector).await
    }

    async fn inner_html(&mut self, selector: &Selector) -> ProbeResult<Option<String>> {
        (**self).inner_html(selector).await
    }

    async fn start_playback(
        &mut self,
        element: &ElementHandle,
        parameters: &Parameters,
    ) -> ProbeResult<()> {
        (**self).start_playback(element, parameters).await
    }

    async fn drain_trace(&mut self, element: &ElementHandle) -> ProbeResult<TraceChunk> {
        (**self).drain_trace(element).await
    }

    async fn close(&mut self) -> ProbeResult<()> {
        (**self).close().await
    }
}
