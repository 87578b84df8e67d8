//! Golden fixture store.
//!
//! One directory per test case, discovered recursively under a root:
//!
//! ```text
//! polyfill/object_flashvars/
//! ├── index.html            fixture page (required)
//! ├── expected.html         golden inner HTML of the container (required)
//! ├── expected_output.txt   golden trace (optional)
//! └── case.yaml             parameters and per-case options (optional)
//! ```
//!
//! Fixtures are read once and never written.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::params::Parameters;
use crate::result::{ProbeError, ProbeResult};
use crate::trace::Transcript;

/// Fixture page file name
pub const PAGE_FILE: &str = "index.html";
/// Golden DOM snapshot file name
pub const EXPECTED_HTML_FILE: &str = "expected.html";
/// Golden trace file name
pub const EXPECTED_TRACE_FILE: &str = "expected_output.txt";
/// Case options file name
pub const CASE_FILE: &str = "case.yaml";

/// Per-case overrides of the harness configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseOptions {
    /// Human-readable description
    pub description: Option<String>,
    /// Activation timeout override in milliseconds
    pub activation_timeout_ms: Option<u64>,
    /// Playback maximum wait override in milliseconds
    pub playback_timeout_ms: Option<u64>,
    /// End-of-trace marker line
    pub end_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CaseFile {
    description: Option<String>,
    flashvars: Option<String>,
    parameters: Parameters,
    expected_trace: Option<String>,
    activation_timeout_ms: Option<u64>,
    playback_timeout_ms: Option<u64>,
    end_marker: Option<String>,
}

// =============================================================================
// TEST CASE
// =============================================================================

/// One golden test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    id: String,
    page_path: String,
    expected_html: String,
    expected_trace: Option<Transcript>,
    parameters: Parameters,
    options: CaseOptions,
}

impl TestCase {
    /// Build a case in memory; the page is `<id>/index.html`
    #[must_use]
    pub fn new(id: impl Into<String>, expected_html: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            page_path: page_path_for(&id),
            id,
            expected_html: expected_html.into(),
            expected_trace: None,
            parameters: Parameters::new(),
            options: CaseOptions::default(),
        }
    }

    /// Set the golden trace
    #[must_use]
    pub fn with_expected_trace(mut self, trace: &str) -> Self {
        self.expected_trace = Some(Transcript::from_text(trace));
        self
    }

    /// Set the startup parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set per-case options
    #[must_use]
    pub fn with_options(mut self, options: CaseOptions) -> Self {
        self.options = options;
        self
    }

    /// Load the case stored in `dir`, identified relative to `root`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::FixtureError`] if a required file is missing or
    /// malformed, or if the golden trace is given twice.
    pub fn load(root: &Path, dir: &Path) -> ProbeResult<Self> {
        let id = case_id(root, dir);
        let fixture_err = |message: String| ProbeError::FixtureError {
            path: dir.display().to_string(),
            message,
        };

        if !dir.join(PAGE_FILE).is_file() {
            return Err(fixture_err(format!("missing {PAGE_FILE}")));
        }
        let expected_html = read_required(dir, EXPECTED_HTML_FILE)?;
        let external_trace = read_optional(dir, EXPECTED_TRACE_FILE)?;
        let case_file = match read_optional(dir, CASE_FILE)? {
            Some(yaml) => serde_yaml_ng::from_str::<CaseFile>(&yaml)
                .map_err(|e| fixture_err(format!("{CASE_FILE}: {e}")))?,
            None => CaseFile::default(),
        };

        let expected_trace = match (case_file.expected_trace, external_trace) {
            (Some(_), Some(_)) => {
                return Err(fixture_err(format!(
                    "expected_trace in {CASE_FILE} conflicts with {EXPECTED_TRACE_FILE}"
                )))
            }
            (inline, external) => inline.or(external).map(|t| Transcript::from_text(&t)),
        };

        let mut parameters = case_file
            .flashvars
            .as_deref()
            .map(Parameters::from_flashvars)
            .unwrap_or_default();
        for (name, value) in case_file.parameters.iter() {
            parameters = parameters.with(name, value.clone());
        }

        tracing::debug!(
            case = %id,
            parameters = parameters.len(),
            has_trace = expected_trace.is_some(),
            "fixture loaded"
        );

        Ok(Self {
            page_path: page_path_for(&id),
            id,
            expected_html,
            expected_trace,
            parameters,
            options: CaseOptions {
                description: case_file.description,
                activation_timeout_ms: case_file.activation_timeout_ms,
                playback_timeout_ms: case_file.playback_timeout_ms,
                end_marker: case_file.end_marker,
            },
        })
    }

    /// Identifier: the case directory relative to the fixture root
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fixture page path relative to the server root
    #[must_use]
    pub fn page_path(&self) -> &str {
        &self.page_path
    }

    /// Golden inner HTML of the container
    #[must_use]
    pub fn expected_html(&self) -> &str {
        &self.expected_html
    }

    /// Golden trace, if the case checks playback
    #[must_use]
    pub const fn expected_trace(&self) -> Option<&Transcript> {
        self.expected_trace.as_ref()
    }

    /// Startup parameters
    #[must_use]
    pub const fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Per-case options
    #[must_use]
    pub const fn options(&self) -> &CaseOptions {
        &self.options
    }

    /// Absolute URL of the fixture page under `base`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidUrl`] if the path cannot be joined.
    pub fn page_url(&self, base: &Url) -> ProbeResult<Url> {
        base.join(&self.page_path).map_err(|e| ProbeError::InvalidUrl {
            url: format!("{base}{}", self.page_path),
            message: e.to_string(),
        })
    }
}

fn page_path_for(id: &str) -> String {
    if id.is_empty() || id == "." {
        PAGE_FILE.to_string()
    } else {
        format!("{id}/{PAGE_FILE}")
    }
}

fn case_id(root: &Path, dir: &Path) -> String {
    let relative = dir.strip_prefix(root).unwrap_or(dir);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn read_text(path: &Path) -> ProbeResult<String> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes).map_err(|e| ProbeError::FixtureError {
        path: path.display().to_string(),
        message: format!("not valid UTF-8: {e}"),
    })
}

fn read_required(dir: &Path, name: &str) -> ProbeResult<String> {
    let path = dir.join(name);
    if !path.is_file() {
        return Err(ProbeError::FixtureError {
            path: dir.display().to_string(),
            message: format!("missing {name}"),
        });
    }
    read_text(&path)
}

fn read_optional(dir: &Path, name: &str) -> ProbeResult<Option<String>> {
    let path = dir.join(name);
    if path.is_file() {
        read_text(&path).map(Some)
    } else {
        Ok(None)
    }
}

// =============================================================================
// FIXTURE STORE
// =============================================================================

/// All cases found under a fixture root, sorted by id
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
    cases: Vec<TestCase>,
}

impl FixtureStore {
    /// Find and load every case under `root`.
    ///
    /// A directory holding an `index.html` is a case; its subdirectories are
    /// not searched further.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not a directory or any case fails to load.
    pub fn discover(root: impl AsRef<Path>) -> ProbeResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ProbeError::FixtureError {
                path: root.display().to_string(),
                message: "fixture root is not a directory".to_string(),
            });
        }

        let mut dirs = Vec::new();
        collect_case_dirs(&root, &mut dirs)?;
        let mut cases = dirs
            .iter()
            .map(|dir| TestCase::load(&root, dir))
            .collect::<ProbeResult<Vec<_>>>()?;
        cases.sort_by(|a, b| a.id.cmp(&b.id));

        if cases.is_empty() {
            tracing::warn!(root = %root.display(), "no fixtures found");
        } else {
            tracing::info!(root = %root.display(), cases = cases.len(), "fixtures discovered");
        }
        Ok(Self { root, cases })
    }

    /// Fixture root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All cases
    #[must_use]
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Look up a case by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    /// Number of cases
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether no cases were found
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

fn collect_case_dirs(dir: &Path, out: &mut Vec<PathBuf>) -> ProbeResult<()> {
    if dir.join(PAGE_FILE).is_file() {
        out.push(dir.to_path_buf());
        return Ok(());
    }
    let mut children: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    children.sort();
    for child in children.into_iter().filter(|p| p.is_dir()) {
        collect_case_dirs(&child, out)?;
    }
    Ok(())
}
