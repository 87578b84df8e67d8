//! Harness configuration.
//!
//! Loaded from YAML, then optionally overridden from the environment:
//!
//! ```yaml
//! base_url: http://localhost:4000/test/
//! activation:
//!   timeout_ms: 10000
//! playback:
//!   max_wait_ms: 30000
//! ignore:
//!   style: drop
//!   /^data-ruffle/: presence
//! parallel_jobs: 4
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

use crate::activation::{ActivationTarget, DEFAULT_LEGACY, DEFAULT_POLYFILLED, DEFAULT_SCOPE};
use crate::dom::{HtmlNormalizer, IgnorePolicy, IgnorePolicyKind};
use crate::monitor::MonitorOptions;
use crate::result::{ProbeError, ProbeResult};
use crate::selector::Selector;
use crate::wait::WaitOptions;

/// Environment variable overriding [`HarnessConfig::base_url`]
pub const ENV_BASE_URL: &str = "POLYPROBE_BASE_URL";

/// Environment variable overriding both the activation and playback timeouts
pub const ENV_TIMEOUT_MS: &str = "POLYPROBE_TIMEOUT_MS";

/// Default server root fixtures are served from
pub const DEFAULT_BASE_URL: &str = "http://localhost:4000/";

// =============================================================================
// SECTIONS
// =============================================================================

/// How the polyfill is loaded and how its trace channel is read
///
/// The trace and completion properties are a harness convention, not part of
/// any player's API. An unmodified player never sets them; the fixture content
/// or a shim loaded with the page has to write trace output into
/// `trace_property` and set `complete_property` when it finishes. Without the
/// completion flag a real-browser run ends on the end marker or the expected
/// trace length instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolyfillConfig {
    /// URL of the polyfill script, relative to the page
    pub script_url: String,
    /// Element property holding trace output not yet drained
    pub trace_property: String,
    /// Element property set once the program has finished
    pub complete_property: String,
}

impl Default for PolyfillConfig {
    fn default() -> Self {
        Self {
            script_url: "/dist/ruffle.js".to_string(),
            trace_property: "__ruffle_log__".to_string(),
            complete_property: "__ruffle_trace_complete__".to_string(),
        }
    }
}

impl PolyfillConfig {
    /// Set the polyfill script URL
    #[must_use]
    pub fn with_script_url(mut self, url: impl Into<String>) -> Self {
        self.script_url = url.into();
        self
    }
}

/// Selectors locating the legacy tag and its replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Container the fixture places the legacy tag in
    pub scope: String,
    /// Legacy tag selector
    pub legacy: String,
    /// Replacement element selector
    pub polyfilled: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            legacy: DEFAULT_LEGACY.to_string(),
            polyfilled: DEFAULT_POLYFILLED.to_string(),
        }
    }
}

// =============================================================================
// HARNESS CONFIG
// =============================================================================

/// Configuration for a harness run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Server root; each case's page path is joined onto it
    pub base_url: String,
    /// Element selectors
    pub selectors: SelectorConfig,
    /// Activation wait
    pub activation: WaitOptions,
    /// Playback collection
    pub playback: MonitorOptions,
    /// Attribute ignore policy for DOM comparison
    pub ignore: BTreeMap<String, IgnorePolicyKind>,
    /// Drop comments before comparing DOM snapshots
    pub ignore_comments: bool,
    /// Stop scheduling cases after the first failure
    pub fail_fast: bool,
    /// Number of cases run concurrently
    pub parallel_jobs: usize,
    /// Polyfill loading and trace channel
    pub polyfill: PolyfillConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            selectors: SelectorConfig::default(),
            activation: WaitOptions::default(),
            playback: MonitorOptions::default(),
            ignore: BTreeMap::new(),
            ignore_comments: true,
            fail_fast: false,
            parallel_jobs: 1,
            polyfill: PolyfillConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the result is invalid.
    pub fn from_yaml(yaml: &str) -> ProbeResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading harness config");
        Self::from_yaml(&yaml)
    }

    /// Apply `POLYPROBE_BASE_URL` and `POLYPROBE_TIMEOUT_MS`
    ///
    /// # Errors
    ///
    /// Returns an error if an override is malformed.
    pub fn with_env_overrides(self) -> ProbeResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns an error if an override is malformed.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ProbeResult<Self> {
        if let Some(base) = lookup(ENV_BASE_URL) {
            self.base_url = base;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let timeout: u64 = raw.trim().parse().map_err(|_| ProbeError::InvalidConfig {
                message: format!("{ENV_TIMEOUT_MS} must be a number of milliseconds, got {raw:?}"),
            })?;
            self.activation.timeout_ms = timeout;
            self.playback.max_wait_ms = timeout;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the configuration for consistency
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> ProbeResult<()> {
        self.base_url()?;
        if self.parallel_jobs == 0 {
            return Err(ProbeError::InvalidConfig {
                message: "parallel_jobs must be at least 1".to_string(),
            });
        }
        for (name, value) in [
            ("selectors.scope", &self.selectors.scope),
            ("selectors.legacy", &self.selectors.legacy),
            ("selectors.polyfilled", &self.selectors.polyfilled),
            ("polyfill.trace_property", &self.polyfill.trace_property),
        ] {
            if value.trim().is_empty() {
                return Err(ProbeError::InvalidConfig {
                    message: format!("{name} must not be empty"),
                });
            }
        }
        IgnorePolicy::compile(&self.ignore)?;
        Ok(())
    }

    /// Base URL as a directory URL (always ends in `/`)
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidUrl`] if the base cannot hold relative paths.
    pub fn base_url(&self) -> ProbeResult<Url> {
        let invalid = |message: String| ProbeError::InvalidUrl {
            url: self.base_url.clone(),
            message,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("cannot be used as a base URL".to_string()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Activation target built from the selector section
    #[must_use]
    pub fn target(&self) -> ActivationTarget {
        ActivationTarget::new(
            Selector::css(self.selectors.scope.clone()),
            self.selectors.legacy.clone(),
            self.selectors.polyfilled.clone(),
        )
    }

    /// DOM normalizer built from the ignore policy
    ///
    /// # Errors
    ///
    /// Returns an error if a policy pattern does not compile.
    pub fn normalizer(&self) -> ProbeResult<HtmlNormalizer> {
        Ok(HtmlNormalizer::new()
            .with_policy(IgnorePolicy::compile(&self.ignore)?)
            .with_ignore_comments(self.ignore_comments))
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the activation wait
    #[must_use]
    pub const fn with_activation(mut self, options: WaitOptions) -> Self {
        self.activation = options;
        self
    }

    /// Set the playback options
    #[must_use]
    pub fn with_playback(mut self, options: MonitorOptions) -> Self {
        self.playback = options;
        self
    }

    /// Add an ignore-policy entry
    #[must_use]
    pub fn with_ignore(mut self, key: impl Into<String>, kind: IgnorePolicyKind) -> Self {
        self.ignore.insert(key.into(), kind);
        self
    }

    /// Stop after the first failing case
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Run up to `jobs` cases concurrently
    #[must_use]
    pub const fn with_parallel_jobs(mut self, jobs: usize) -> Self {
        self.parallel_jobs = jobs;
        self
    }

    /// Set the polyfill section
    #[must_use]
    pub fn with_polyfill(mut self, polyfill: PolyfillConfig) -> Self {
        self.polyfill = polyfill;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod yaml_tests {
        use super::*;

        #[test]
        fn test_empty_yaml_gives_defaults() {
            let config = HarnessConfig::from_yaml("{}").unwrap();
            assert_eq!(config, HarnessConfig::default());
        }

        #[test]
        fn test_full_yaml() {
            let yaml = r"
base_url: http://127.0.0.1:8080/test
activation:
  timeout_ms: 500
playback:
  max_wait_ms: 2000
  end_marker: DONE
ignore:
  style: drop
  /^data-/: presence
  id:
    mask: '\d+'
fail_fast: true
parallel_jobs: 3
";
            let config = HarnessConfig::from_yaml(yaml).unwrap();
            assert_eq!(config.activation.timeout_ms, 500);
            assert_eq!(config.playback.end_marker.as_deref(), Some("DONE"));
            assert_eq!(config.ignore.len(), 3);
            assert!(config.fail_fast);
            assert_eq!(config.parallel_jobs, 3);
            assert_eq!(config.base_url().unwrap().as_str(), "http://127.0.0.1:8080/test/");
        }

        #[test]
        fn test_invalid_values_rejected() {
            assert!(matches!(
                HarnessConfig::from_yaml("parallel_jobs: 0"),
                Err(ProbeError::InvalidConfig { .. })
            ));
            assert!(matches!(
                HarnessConfig::from_yaml("base_url: 'not a url'"),
                Err(ProbeError::InvalidUrl { .. })
            ));
            assert!(matches!(
                HarnessConfig::from_yaml("ignore:\n  '/(/': drop"),
                Err(ProbeError::Pattern(_))
            ));
            assert!(matches!(
                HarnessConfig::from_yaml("parallel_jobs: [1"),
                Err(ProbeError::Yaml(_))
            ));
        }

        #[test]
        fn test_load_from_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("polyprobe.yaml");
            std::fs::write(&path, "fail_fast: true\n").unwrap();
            assert!(HarnessConfig::load(&path).unwrap().fail_fast);
            assert!(matches!(
                HarnessConfig::load(dir.path().join("missing.yaml")),
                Err(ProbeError::Io(_))
            ));
        }
    }

    mod override_tests {
        use super::*;

        #[test]
        fn test_overrides_apply() {
            let config = HarnessConfig::new()
                .with_overrides(|key| match key {
                    ENV_BASE_URL => Some("http://ci:9000/".into()),
                    ENV_TIMEOUT_MS => Some(" 1500 ".into()),
                    _ => None,
                })
                .unwrap();
            assert_eq!(config.base_url, "http://ci:9000/");
            assert_eq!(config.activation.timeout_ms, 1500);
            assert_eq!(config.playback.max_wait_ms, 1500);
        }

        #[test]
        fn test_bad_timeout_override() {
            let err = HarnessConfig::new()
                .with_overrides(|key| (key == ENV_TIMEOUT_MS).then(|| "soon".to_string()))
                .unwrap_err();
            assert!(err.to_string().contains(ENV_TIMEOUT_MS));
        }

        #[test]
        fn test_no_overrides_keeps_values() {
            let config = HarnessConfig::new().with_fail_fast(true).with_overrides(|_| None).unwrap();
            assert!(config.fail_fast);
            assert_eq!(config.base_url, DEFAULT_BASE_URL);
        }
    }

    mod derived_tests {
        use super::*;

        #[test]
        fn test_target_and_normalizer() {
            let config = HarnessConfig::new().with_ignore("style", IgnorePolicyKind::Drop);
            assert_eq!(config.target(), ActivationTarget::default());
            let normalized = config
                .normalizer()
                .unwrap()
                .normalize(r#"<div style="x" id="a"></div>"#);
            assert_eq!(normalized.as_str(), r#"<div id="a"></div>"#);
        }

        #[test]
        fn test_builders() {
            let config = HarnessConfig::new()
                .with_base_url("http://h/")
                .with_activation(WaitOptions::new().with_timeout(7))
                .with_playback(MonitorOptions::new().with_max_wait(9))
                .with_parallel_jobs(2)
                .with_polyfill(PolyfillConfig::default().with_script_url("/r.js"));
            assert_eq!(config.activation.timeout_ms, 7);
            assert_eq!(config.playback.max_wait_ms, 9);
            assert_eq!(config.parallel_jobs, 2);
            assert_eq!(config.polyfill.script_url, "/r.js");
            config.validate().unwrap();
        }
    }
}
