//! Headless browser control.
//!
//! With the `browser` feature this drives Chromium through the Chrome
//! `DevTools` Protocol (chromiumoxide) and hands out one [`Session`] per page.
//! Without it, [`Browser::launch`] reports that no browser is available and
//! tests run against [`crate::session::ScriptedSession`] instead.
//!
//! [`Session`]: crate::session::Session

use crate::config::PolyfillConfig;
use crate::result::{ProbeError, ProbeResult};

/// Browser configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 800,
            viewport_height: 600,
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Script appending the polyfill `<script>` tag and resolving once it loaded
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn injection_script(polyfill: &PolyfillConfig) -> String {
    let url = crate::selector::js_string(&polyfill.script_url);
    format!(
        "new Promise((resolve, reject) => {{ \
            const s = document.createElement('script'); \
            s.src = {url}; \
            s.onload = () => resolve(true); \
            s.onerror = () => reject(new Error('failed to load ' + {url})); \
            document.head.appendChild(s); \
        }})"
    )
}

/// Expression reading and resetting the trace property of the element.
///
/// Both properties come from [`PolyfillConfig`] and must be populated by the
/// page itself.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn drain_script(query: &str, polyfill: &PolyfillConfig) -> String {
    let log = crate::selector::js_string(&polyfill.trace_property);
    let done = crate::selector::js_string(&polyfill.complete_property);
    format!(
        "(() => {{ const el = {query}; if (!el) return null; \
            const text = el[{log}] || ''; el[{log}] = ''; \
            return {{ text: String(text), complete: !!el[{done}] }}; }})()"
    )
}

/// Expression starting playback, passing parameters when there are any
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn playback_script(query: &str, parameters: &serde_json::Value, has_parameters: bool) -> String {
    let load = if has_parameters {
        format!(
            "el.load({{ url: el.getAttribute('src') || el.getAttribute('data'), parameters: {parameters} }}); "
        )
    } else {
        String::new()
    };
    format!("(() => {{ const el = {query}; if (!el) return false; {load}el.play(); return true; }})()")
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn not_found(what: &str) -> ProbeError {
    ProbeError::ScriptError {
        message: format!("no element matches {what}"),
    }
}

// ============================================================================
// Real CDP Implementation (when `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc, clippy::significant_drop_tightening)]
mod cdp {
    use super::*;
    use crate::params::Parameters;
    use crate::selector::{ElementHandle, Selector};
    use crate::session::{Session, TraceChunk};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use serde::de::DeserializeOwned;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Browser instance with real CDP connection
    #[derive(Debug)]
    pub struct Browser {
        config: BrowserConfig,
        inner: Arc<Mutex<CdpBrowser>>,
        #[allow(dead_code)]
        handle: tokio::task::JoinHandle<()>,
    }

    impl Browser {
        /// Launch a new browser instance with real CDP
        pub async fn launch(config: BrowserConfig) -> ProbeResult<Self> {
            let mut builder = CdpConfig::builder()
                .window_size(config.viewport_width, config.viewport_height);

            if !config.headless {
                builder = builder.with_head();
            }

            if !config.sandbox {
                builder = builder.no_sandbox();
            }

            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }

            let cdp_config = builder
                .build()
                .map_err(|e| ProbeError::BrowserLaunchError { message: e })?;

            let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(|e| {
                ProbeError::BrowserLaunchError {
                    message: e.to_string(),
                }
            })?;

            let handle = tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            tracing::info!(headless = config.headless, "browser launched");
            Ok(Self {
                config,
                inner: Arc::new(Mutex::new(browser)),
                handle,
            })
        }

        /// Open a blank page wrapped as a session
        pub async fn new_session(&self, polyfill: PolyfillConfig) -> ProbeResult<CdpSession> {
            let browser = self.inner.lock().await;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| ProbeError::PageError {
                    message: e.to_string(),
                })?;
            Ok(CdpSession { page, polyfill })
        }

        /// Get the browser configuration
        #[must_use]
        pub const fn config(&self) -> &BrowserConfig {
            &self.config
        }

        /// Close the browser
        pub async fn close(self) -> ProbeResult<()> {
            let mut browser = self.inner.lock().await;
            browser
                .close()
                .await
                .map_err(|e| ProbeError::BrowserLaunchError {
                    message: e.to_string(),
                })?;
            Ok(())
        }
    }

    /// One Chromium page driven over CDP
    #[derive(Debug)]
    pub struct CdpSession {
        page: CdpPage,
        polyfill: PolyfillConfig,
    }

    impl CdpSession {
        async fn eval<T: DeserializeOwned>(&self, expression: String) -> ProbeResult<T> {
            let params = EvaluateParams::builder()
                .expression(expression)
                .await_promise(true)
                .return_by_value(true)
                .build()
                .map_err(|message| ProbeError::ScriptError { message })?;
            let result = self
                .page
                .evaluate_expression(params)
                .await
                .map_err(|e| ProbeError::ScriptError {
                    message: e.to_string(),
                })?;
            result.into_value().map_err(|e| ProbeError::ScriptError {
                message: e.to_string(),
            })
        }
    }

    #[async_trait]
    impl Session for CdpSession {
        async fn open(&mut self, url: &str) -> ProbeResult<()> {
            let nav_err = |e: chromiumoxide::error::CdpError| ProbeError::NavigationError {
                url: url.to_string(),
                message: e.to_string(),
            };
            self.page.goto(url).await.map_err(nav_err)?;
            self.page.wait_for_navigation().await.map_err(nav_err)?;
            tracing::debug!(url, "page loaded");
            Ok(())
        }

        async fn inject_polyfill(&mut self) -> ProbeResult<()> {
            let _: bool = self.eval(injection_script(&self.polyfill)).await?;
            tracing::debug!(script = %self.polyfill.script_url, "polyfill injected");
            Ok(())
        }

        async fn count(&mut self, selector: &Selector) -> ProbeResult<usize> {
            self.eval(selector.to_count_query()).await
        }

        async fn inner_html(&mut self, selector: &Selector) -> ProbeResult<Option<String>> {
            self.eval(format!(
                "(() => {{ const el = {}; return el ? el.innerHTML : null; }})()",
                selector.to_query()
            ))
            .await
        }

        async fn start_playback(
            &mut self,
            element: &ElementHandle,
            parameters: &Parameters,
        ) -> ProbeResult<()> {
            let script = playback_script(
                &element.selector().to_query(),
                &parameters.to_runtime_json(),
                parameters.runtime_pairs().next().is_some(),
            );
            let started: bool = self.eval(script).await?;
            if started {
                Ok(())
            } else {
                Err(not_found(&element.to_string()))
            }
        }

        async fn drain_trace(&mut self, element: &ElementHandle) -> ProbeResult<TraceChunk> {
            let chunk: Option<TraceChunk> = self
                .eval(drain_script(&element.selector().to_query(), &self.polyfill))
                .await?;
            chunk.ok_or_else(|| not_found(&element.to_string()))
        }

        async fn close(&mut self) -> ProbeResult<()> {
            self.page
                .clone()
                .close()
                .await
                .map_err(|e| ProbeError::PageError {
                    message: e.to_string(),
                })
        }
    }
}

// ============================================================================
// Stand-in (when `browser` feature is NOT enabled)
// ============================================================================

#[cfg(not(feature = "browser"))]
mod unavailable {
    use super::{BrowserConfig, ProbeError, ProbeResult};

    /// Browser handle when the `browser` feature is disabled
    #[derive(Debug)]
    pub struct Browser {
        _private: (),
    }

    impl Browser {
        /// Always fails: CDP support is compiled out
        ///
        /// # Errors
        ///
        /// Always returns [`ProbeError::BrowserLaunchError`]
        #[allow(clippy::unused_async)]
        pub async fn launch(_config: BrowserConfig) -> ProbeResult<Self> {
            Err(ProbeError::BrowserLaunchError {
                message: "Browser feature not enabled. Enable 'browser' feature for real CDP support."
                    .to_string(),
            })
        }
    }
}

// Re-export based on feature
#[cfg(feature = "browser")]
pub use cdp::{Browser, CdpSession};

#[cfg(not(feature = "browser"))]
pub use unavailable::Browser;
