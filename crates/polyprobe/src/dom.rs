//! HTML normalization and the DOM oracle.
//!
//! Golden snapshots are written by hand and live markup is serialized by a
//! browser, so the two never agree byte for byte. Both sides are parsed as a
//! body fragment, rewritten into a canonical tree and serialized one node per
//! line. Equality is decided on the canonical text; the line diff exists only
//! for the failure report.

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::compare::ComparisonResult;
use crate::diff::TextDiff;
use crate::result::ProbeResult;

/// Replacement written over masked attribute text
pub const MASK: &str = "*";

const INDENT: &str = "  ";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

// =============================================================================
// IGNORE POLICY
// =============================================================================

/// What to do with an attribute that a policy entry matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnorePolicyKind {
    /// Remove the attribute entirely
    Drop,
    /// Keep the attribute name, blank its value
    Presence,
    /// Replace every match of the regex in the value with `*`
    Mask(String),
}

#[derive(Debug, Clone)]
enum AttrMatcher {
    Name(String),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
enum AttrAction {
    Drop,
    Presence,
    Mask(Regex),
}

#[derive(Debug, Clone)]
struct IgnoreRule {
    matcher: AttrMatcher,
    action: AttrAction,
}

/// Compiled attribute ignore policy.
///
/// Keys are attribute names (case-insensitive) or `/regex/` patterns matched
/// against the attribute name. Exact names take precedence over patterns;
/// patterns are tried in key order.
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    exact: Vec<IgnoreRule>,
    patterns: Vec<IgnoreRule>,
}

impl IgnorePolicy {
    /// Policy that keeps every attribute as is
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a policy table
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Pattern`] if a key or mask is not a valid regex.
    pub fn compile(table: &BTreeMap<String, IgnorePolicyKind>) -> ProbeResult<Self> {
        let mut policy = Self::new();
        for (key, kind) in table {
            let action = match kind {
                IgnorePolicyKind::Drop => AttrAction::Drop,
                IgnorePolicyKind::Presence => AttrAction::Presence,
                IgnorePolicyKind::Mask(pattern) => AttrAction::Mask(Regex::new(pattern)?),
            };
            match key
                .strip_prefix('/')
                .and_then(|k| k.strip_suffix('/'))
                .filter(|k| !k.is_empty())
            {
                Some(pattern) => policy.patterns.push(IgnoreRule {
                    matcher: AttrMatcher::Pattern(Regex::new(pattern)?),
                    action,
                }),
                None => policy.exact.push(IgnoreRule {
                    matcher: AttrMatcher::Name(key.to_ascii_lowercase()),
                    action,
                }),
            }
        }
        Ok(policy)
    }

    /// Whether the policy has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    fn rule_for(&self, name: &str) -> Option<&IgnoreRule> {
        self.exact
            .iter()
            .find(|r| matches!(&r.matcher, AttrMatcher::Name(n) if n == name))
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|r| matches!(&r.matcher, AttrMatcher::Pattern(re) if re.is_match(name)))
            })
    }

    /// Apply the policy to one attribute; `None` means the attribute is dropped
    #[must_use]
    pub fn apply(&self, name: &str, value: &str) -> Option<String> {
        match self.rule_for(name).map(|r| &r.action) {
            None => Some(value.to_string()),
            Some(AttrAction::Drop) => None,
            Some(AttrAction::Presence) => Some(String::new()),
            Some(AttrAction::Mask(re)) => Some(re.replace_all(value, MASK).into_owned()),
        }
    }
}

// =============================================================================
// NORMALIZED TREE
// =============================================================================

/// A node of a normalized fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedNode {
    /// Element with sorted attributes
    Element {
        /// Lowercase tag name
        name: String,
        /// Attributes sorted by name
        attrs: Vec<(String, String)>,
        /// Child nodes
        children: Vec<NormalizedNode>,
    },
    /// Collapsed, non-empty text
    Text(String),
    /// Comment (only kept when comments are not ignored)
    Comment(String),
}

/// Canonical form of an HTML fragment
#[derive(Debug, Clone)]
pub struct NormalizedHtml {
    nodes: Vec<NormalizedNode>,
    canonical: String,
}

impl NormalizedHtml {
    /// Top-level nodes
    #[must_use]
    pub fn nodes(&self) -> &[NormalizedNode] {
        &self.nodes
    }

    /// Canonical serialization
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for NormalizedHtml {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for NormalizedHtml {}

impl fmt::Display for NormalizedHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

// =============================================================================
// NORMALIZER
// =============================================================================

/// Rewrites HTML fragments into their canonical form
#[derive(Debug, Clone)]
pub struct HtmlNormalizer {
    policy: IgnorePolicy,
    ignore_comments: bool,
}

impl Default for HtmlNormalizer {
    fn default() -> Self {
        Self {
            policy: IgnorePolicy::new(),
            ignore_comments: true,
        }
    }
}

impl HtmlNormalizer {
    /// Normalizer with no ignore policy that drops comments
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attribute ignore policy
    #[must_use]
    pub fn with_policy(mut self, policy: IgnorePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keep or drop comments
    #[must_use]
    pub const fn with_ignore_comments(mut self, ignore: bool) -> Self {
        self.ignore_comments = ignore;
        self
    }

    /// Normalize an HTML fragment
    #[must_use]
    pub fn normalize(&self, html: &str) -> NormalizedHtml {
        let fragment = Html::parse_fragment(html);
        let nodes = self.convert_children(fragment.root_element());

        let mut canonical = String::new();
        for node in &nodes {
            write_node(&mut canonical, node, 0);
        }
        if canonical.ends_with('\n') {
            canonical.pop();
        }
        NormalizedHtml { nodes, canonical }
    }

    fn convert_children(&self, parent: ElementRef<'_>) -> Vec<NormalizedNode> {
        let mut out = Vec::new();
        // Adjacent text (also across dropped comments) merges before collapsing.
        let mut pending = String::new();

        for child in parent.children() {
            match child.value() {
                Node::Text(text) => pending.push_str(text),
                Node::Comment(comment) => {
                    if !self.ignore_comments {
                        flush_text(&mut pending, &mut out);
                        out.push(NormalizedNode::Comment(String::from(&**comment)));
                    }
                }
                Node::Element(element) => {
                    flush_text(&mut pending, &mut out);
                    let name = element.name().to_ascii_lowercase();
                    let mut attrs: Vec<(String, String)> = element
                        .attrs()
                        .filter_map(|(k, v)| {
                            let key = k.to_ascii_lowercase();
                            let value = if key == "class" {
                                sort_class_tokens(v)
                            } else {
                                v.to_string()
                            };
                            self.policy.apply(&key, &value).map(|v| (key, v))
                        })
                        .collect();
                    attrs.sort();
                    let children = match ElementRef::wrap(child) {
                        Some(el) if !VOID_ELEMENTS.contains(&name.as_str()) => {
                            self.convert_children(el)
                        }
                        _ => Vec::new(),
                    };
                    out.push(NormalizedNode::Element {
                        name,
                        attrs,
                        children,
                    });
                }
                _ => {}
            }
        }
        flush_text(&mut pending, &mut out);
        out
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

fn flush_text(pending: &mut String, out: &mut Vec<NormalizedNode>) {
    let text = collapse_whitespace(pending);
    pending.clear();
    if !text.is_empty() {
        out.push(NormalizedNode::Text(text));
    }
}

fn sort_class_tokens(value: &str) -> String {
    let mut tokens: Vec<&str> = value.split_ascii_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out
}

fn write_node(out: &mut String, node: &NormalizedNode, depth: usize) {
    let indent = INDENT.repeat(depth);
    match node {
        NormalizedNode::Text(text) => {
            out.push_str(&indent);
            out.push_str(&escape_text(text));
            out.push('\n');
        }
        NormalizedNode::Comment(text) => {
            out.push_str(&indent);
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->\n");
        }
        NormalizedNode::Element {
            name,
            attrs,
            children,
        } => {
            out.push_str(&indent);
            out.push('<');
            out.push_str(name);
            for (key, value) in attrs {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&name.as_str()) {
                out.push('\n');
                return;
            }
            if children.is_empty() {
                out.push_str("</");
                out.push_str(name);
                out.push_str(">\n");
                return;
            }

            out.push('\n');
            let raw = RAW_TEXT_ELEMENTS.contains(&name.as_str());
            for child in children {
                match child {
                    NormalizedNode::Text(text) if raw => {
                        out.push_str(&INDENT.repeat(depth + 1));
                        out.push_str(text);
                        out.push('\n');
                    }
                    other => write_node(out, other, depth + 1),
                }
            }
            out.push_str(&indent);
            out.push_str("</");
            out.push_str(name);
            out.push_str(">\n");
        }
    }
}

// =============================================================================
// DOM ORACLE
// =============================================================================

/// Why two fragments differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomDiff {
    /// Canonical golden fragment
    pub expected: String,
    /// Canonical live fragment
    pub actual: String,
    /// Line diff between the two (expected vs actual)
    pub diff: TextDiff,
}

impl fmt::Display for DomDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diff)
    }
}

/// Compares live markup against a golden snapshot after normalization
#[derive(Debug, Clone, Default)]
pub struct DomComparator {
    normalizer: HtmlNormalizer,
}

impl DomComparator {
    /// Create a comparator around a normalizer
    #[must_use]
    pub const fn new(normalizer: HtmlNormalizer) -> Self {
        Self { normalizer }
    }

    /// The normalizer used for both sides
    #[must_use]
    pub const fn normalizer(&self) -> &HtmlNormalizer {
        &self.normalizer
    }

    /// Compare live markup against golden markup
    #[must_use]
    pub fn compare(&self, actual: &str, golden: &str) -> ComparisonResult<DomDiff> {
        let actual = self.normalizer.normalize(actual);
        let golden = self.normalizer.normalize(golden);
        Self::compare_normalized(&actual, &golden)
    }

    /// Compare two already normalized fragments
    #[must_use]
    pub fn compare_normalized(
        actual: &NormalizedHtml,
        golden: &NormalizedHtml,
    ) -> ComparisonResult<DomDiff> {
        if actual == golden {
            return ComparisonResult::Equal;
        }
        ComparisonResult::Unequal(DomDiff {
            expected: golden.as_str().to_string(),
            actual: actual.as_str().to_string(),
            diff: TextDiff::lines(golden.as_str(), actual.as_str()),
        })
    }
}
