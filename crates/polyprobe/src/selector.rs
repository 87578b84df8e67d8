//! Element selection.
//!
//! A [`Selector`] describes an element the harness wants to observe. It can be
//! rendered either as a CSS selector (for the in-memory session) or as a
//! JavaScript expression (for a real page).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Selector type for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector (e.g., "#test-container")
    Css(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// CSS selector evaluated inside the first element matched by `scope`
    Within {
        /// Enclosing element
        scope: Box<Selector>,
        /// CSS selector relative to the scope
        css: String,
    },
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Narrow this selector: match `css` inside the first element matched by `self`
    #[must_use]
    pub fn within(self, css: impl Into<String>) -> Self {
        Self::Within {
            scope: Box::new(self),
            css: css.into(),
        }
    }

    /// CSS text for a document-level match, if this selector is not scoped
    #[must_use]
    pub fn as_css(&self) -> Option<String> {
        match self {
            Self::Css(s) => Some(s.clone()),
            Self::TestId(id) => Some(format!("[data-testid={}]", js_string(id))),
            Self::Within { .. } => None,
        }
    }

    /// Convert to a JavaScript expression yielding the first match or `null`
    #[must_use]
    pub fn to_query(&self) -> String {
        match self {
            Self::Within { scope, css } => format!(
                "(() => {{ const s = {}; return s ? s.querySelector({}) : null; }})()",
                scope.to_query(),
                js_string(css)
            ),
            other => format!(
                "document.querySelector({})",
                js_string(&other.as_css().unwrap_or_default())
            ),
        }
    }

    /// Convert to a JavaScript expression yielding the number of matches
    #[must_use]
    pub fn to_count_query(&self) -> String {
        match self {
            Self::Within { scope, css } => format!(
                "(() => {{ const s = {}; return s ? s.querySelectorAll({}).length : 0; }})()",
                scope.to_query(),
                js_string(css)
            ),
            other => format!(
                "document.querySelectorAll({}).length",
                js_string(&other.as_css().unwrap_or_default())
            ),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "{s}"),
            Self::TestId(id) => write!(f, "[data-testid={id:?}]"),
            Self::Within { scope, css } => write!(f, "{scope} \u{25b8} {css}"),
        }
    }
}

/// Quote `s` as a JavaScript string literal
pub(crate) fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Reference to an element the harness has observed in the live document.
///
/// Handles are addresses, not owners: the element itself lives in the
/// browser session and is re-resolved from the selector on every use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    selector: Selector,
}

impl ElementHandle {
    /// Create a handle for the first element matching `selector`
    #[must_use]
    pub const fn new(selector: Selector) -> Self {
        Self { selector }
    }

    /// Selector that resolves this handle
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector)
    }
}
