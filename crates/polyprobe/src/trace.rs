//! Trace transcripts and the trace oracle.
//!
//! Content running in the player writes trace lines through a side channel.
//! The harness appends whatever it drains into a [`TraceBuffer`], freezes it
//! into a [`Transcript`] once collection ends, and compares that against the
//! golden transcript line by line. Nothing is trimmed, reordered or re-typed:
//! the only rewrite is folding `\r\n` into `\n`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::compare::ComparisonResult;

/// Prefix of a label line in golden transcripts
pub const LABEL_PREFIX: &str = "// ";

/// Fold CRLF line endings into LF
fn fold_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

// =============================================================================
// TRANSCRIPT
// =============================================================================

/// Frozen, ordered trace output.
///
/// Lines are the `'\n'`-separated segments of the text, so a trailing newline
/// shows up as a final empty line and is significant for comparison. An empty
/// transcript has no lines at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Transcript {
    text: String,
}

impl Transcript {
    /// Build a transcript from complete text
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self {
            text: fold_line_endings(text),
        }
    }

    /// Full text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Lines in production order
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        let text = (!self.text.is_empty()).then_some(self.text.as_str());
        text.into_iter().flat_map(|text| text.split('\n'))
    }

    /// Number of lines
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines().count()
    }

    /// Whether nothing was traced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Size of the text in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }
}

impl From<String> for Transcript {
    fn from(text: String) -> Self {
        Self::from_text(&text)
    }
}

impl From<Transcript> for String {
    fn from(transcript: Transcript) -> Self {
        transcript.text
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// =============================================================================
// TRACE BUFFER
// =============================================================================

/// Append-only collector for trace chunks.
///
/// Chunks may split lines anywhere; the buffer only concatenates.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer {
    text: String,
    chunks: usize,
}

impl TraceBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a drained chunk verbatim
    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.text.push_str(chunk);
        self.chunks += 1;
    }

    /// Bytes collected so far
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    /// Non-empty chunks appended so far
    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Whether any complete line equals `marker`
    #[must_use]
    pub fn contains_line(&self, marker: &str) -> bool {
        let text = fold_line_endings(&self.text);
        let mut lines: Vec<&str> = text.split('\n').collect();
        // The last segment may still be growing.
        lines.pop();
        lines.iter().any(|l| *l == marker)
    }

    /// Stop collecting and freeze the transcript
    #[must_use]
    pub fn freeze(self) -> Transcript {
        Transcript::from_text(&self.text)
    }
}

// =============================================================================
// GOLDEN TRACE FIELDS
// =============================================================================

/// A labelled field of a golden transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceField {
    /// Label text after `// `
    pub label: String,
    /// Index of the label line
    pub line: usize,
    /// Value lines, separator removed
    pub values: Vec<String>,
}

/// Golden transcript split into `// <label>` fields.
///
/// Convention: a label line, its value line(s), then one blank separator
/// line. Lines before the first label are kept as a preamble.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceDocument {
    /// Lines before the first label
    pub preamble: Vec<String>,
    /// Labelled fields in order
    pub fields: Vec<TraceField>,
}

impl TraceDocument {
    /// Parse a transcript into fields
    #[must_use]
    pub fn parse(transcript: &Transcript) -> Self {
        let mut lines: Vec<&str> = transcript.lines().collect();
        if transcript.as_str().ends_with('\n') {
            lines.pop();
        }

        let mut doc = Self::default();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(label) = line.strip_prefix(LABEL_PREFIX) {
                doc.close_last_field();
                doc.fields.push(TraceField {
                    label: label.to_string(),
                    line: idx,
                    values: Vec::new(),
                });
            } else if let Some(field) = doc.fields.last_mut() {
                field.values.push((*line).to_string());
            } else {
                doc.preamble.push((*line).to_string());
            }
        }
        doc.close_last_field();
        doc
    }

    fn close_last_field(&mut self) {
        if let Some(field) = self.fields.last_mut() {
            if field.values.len() > 1 && field.values.last().is_some_and(String::is_empty) {
                field.values.pop();
            }
        }
    }

    /// Look up the first field with `label`
    #[must_use]
    pub fn field(&self, label: &str) -> Option<&TraceField> {
        self.fields.iter().find(|f| f.label == label)
    }

    /// Label of the field that owns line `index`
    #[must_use]
    pub fn field_at(&self, index: usize) -> Option<&TraceField> {
        self.fields.iter().rev().find(|f| f.line <= index)
    }
}

// =============================================================================
// TRACE ORACLE
// =============================================================================

/// First divergence between an actual and an expected transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMismatch {
    /// Zero-based index of the first differing line
    pub index: usize,
    /// Expected line, `None` if the expected transcript ended earlier
    pub expected: Option<String>,
    /// Actual line, `None` if the actual transcript ended earlier
    pub actual: Option<String>,
    /// Golden field label enclosing the line, if any
    pub field: Option<String>,
    /// Line counts (actual, expected)
    pub lengths: (usize, usize),
}

impl fmt::Display for TraceMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.index + 1)?;
        if let Some(field) = &self.field {
            write!(f, " (in `{field}`)")?;
        }
        let show = |line: &Option<String>| {
            line.as_ref()
                .map_or_else(|| "<end of trace>".to_string(), |l| format!("{l:?}"))
        };
        write!(
            f,
            ": expected {}, got {} [{} actual line(s), {} expected]",
            show(&self.expected),
            show(&self.actual),
            self.lengths.0,
            self.lengths.1
        )
    }
}

/// Exact, order-sensitive, whitespace-significant transcript comparison
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceComparator;

impl TraceComparator {
    /// Create a comparator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compare `actual` against the golden `expected` transcript
    #[must_use]
    pub fn compare(&self, actual: &Transcript, expected: &Transcript) -> ComparisonResult<TraceMismatch> {
        let actual_lines: Vec<&str> = actual.lines().collect();
        let expected_lines: Vec<&str> = expected.lines().collect();
        let lengths = (actual_lines.len(), expected_lines.len());

        let max = lengths.0.max(lengths.1);
        let first = (0..max).find(|&i| actual_lines.get(i) != expected_lines.get(i));

        match first {
            None => ComparisonResult::Equal,
            Some(index) => {
                let field = TraceDocument::parse(expected)
                    .field_at(index)
                    .map(|f| f.label.clone());
                ComparisonResult::Unequal(TraceMismatch {
                    index,
                    expected: expected_lines.get(index).map(|s| (*s).to_string()),
                    actual: actual_lines.get(index).map(|s| (*s).to_string()),
                    field,
                    lengths,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const FLASHVARS_TRACE: &str = "// _level0.a\n1\n\n// typeof(a)\nstring\n\n\
// _level0.b\n3 %3\n\n// typeof(b)\nstring\n\n\
// _level0.c\n\n\n// typeof(c)\nstring\n\n\
// _level0.d\nundefined\n\n// typeof(d)\nundefined\n\n";

    mod transcript_tests {
        use super::*;

        #[test]
        fn test_lines_keep_trailing_newline() {
            let t = Transcript::from_text("a\nb\n");
            assert_eq!(t.lines().collect::<Vec<_>>(), vec!["a", "b", ""]);
            assert_eq!(t.len(), 3);
        }

        #[test]
        fn test_empty_transcript_has_no_lines() {
            let t = Transcript::from_text("");
            assert!(t.is_empty());
            assert_eq!(t.len(), 0);
            assert_eq!(Transcript::from_text("\n").len(), 2);
        }

        #[test]
        fn test_crlf_is_folded() {
            assert_eq!(
                Transcript::from_text("a\r\nb"),
                Transcript::from_text("a\nb")
            );
        }

        #[test]
        fn test_whitespace_is_preserved() {
            let t = Transcript::from_text("  padded \t");
            assert_eq!(t.lines().next(), Some("  padded \t"));
        }

        #[test]
        fn test_serde_as_plain_string() {
            let t = Transcript::from_text("x\ny");
            assert_eq!(serde_json::to_string(&t).unwrap(), r#""x\ny""#);
        }
    }

    mod buffer_tests {
        use super::*;

        #[test]
        fn test_chunks_split_mid_line() {
            let mut buf = TraceBuffer::new();
            buf.push("// _lev");
            buf.push("el0.a\n1");
            buf.push("");
            buf.push("\n");
            assert_eq!(buf.chunk_count(), 3);
            assert_eq!(buf.freeze().as_str(), "// _level0.a\n1\n");
        }

        #[test]
        fn test_contains_line_ignores_partial_tail() {
            let mut buf = TraceBuffer::new();
            buf.push("hello\nEN");
            assert!(buf.contains_line("hello"));
            assert!(!buf.contains_line("EN"));
            buf.push("D\n");
            assert!(buf.contains_line("END"));
        }
    }

    mod document_tests {
        use super::*;

        #[test]
        fn test_parse_flashvars_block() {
            let doc = TraceDocument::parse(&Transcript::from_text(FLASHVARS_TRACE));
            assert_eq!(doc.fields.len(), 8);
            assert!(doc.preamble.is_empty());
            assert_eq!(doc.field("_level0.a").unwrap().values, vec!["1"]);
            assert_eq!(doc.field("_level0.b").unwrap().values, vec!["3 %3"]);
            assert_eq!(doc.field("_level0.c").unwrap().values, vec![""]);
            assert_eq!(doc.field("typeof(c)").unwrap().values, vec!["string"]);
            assert_eq!(doc.field("_level0.d").unwrap().values, vec!["undefined"]);
            assert_eq!(doc.field("typeof(d)").unwrap().values, vec!["undefined"]);
        }

        #[test]
        fn test_preamble_and_field_at() {
            let doc = TraceDocument::parse(&Transcript::from_text("boot\n// x\n1\n"));
            assert_eq!(doc.preamble, vec!["boot"]);
            assert!(doc.field_at(0).is_none());
            assert_eq!(doc.field_at(2).unwrap().label, "x");
        }
    }

    mod comparator_tests {
        use super::*;

        #[test]
        fn test_equal_transcripts() {
            let a = Transcript::from_text(FLASHVARS_TRACE);
            let b = Transcript::from_text(FLASHVARS_TRACE);
            assert!(TraceComparator::new().compare(&a, &b).is_equal());
        }

        #[test]
        fn test_first_mismatch_reported_with_field() {
            let expected = Transcript::from_text(FLASHVARS_TRACE);
            let actual = Transcript::from_text(&FLASHVARS_TRACE.replace("3 %3", "3 %"));
            let result = TraceComparator::new().compare(&actual, &expected);
            let mismatch = result.diff().expect("should differ");
            assert_eq!(mismatch.index, 7);
            assert_eq!(mismatch.expected.as_deref(), Some("3 %3"));
            assert_eq!(mismatch.actual.as_deref(), Some("3 %"));
            assert_eq!(mismatch.field.as_deref(), Some("_level0.b"));
            assert!(mismatch.to_string().contains("line 8 (in `_level0.b`)"));
        }

        #[test]
        fn test_shorter_actual_reports_end_of_trace() {
            let expected = Transcript::from_text("a\nb\nc");
            let actual = Transcript::from_text("a\nb");
            let mismatch = TraceComparator::new()
                .compare(&actual, &expected)
                .diff()
                .cloned()
                .unwrap();
            assert_eq!(mismatch.index, 2);
            assert_eq!(mismatch.actual, None);
            assert_eq!(mismatch.lengths, (2, 3));
            assert!(mismatch.to_string().contains("<end of trace>"));
        }

        #[test]
        fn test_silent_run_against_one_empty_line() {
            let mismatch = TraceComparator::new()
                .compare(&Transcript::from_text(""), &Transcript::from_text("\n"))
                .diff()
                .cloned()
                .unwrap();
            assert_eq!(mismatch.index, 0);
            assert_eq!(mismatch.expected.as_deref(), Some(""));
            assert_eq!(mismatch.actual, None);
            assert_eq!(mismatch.lengths, (0, 2));
        }

        #[test]
        fn test_trailing_newline_is_significant() {
            let result = TraceComparator::new()
                .compare(&Transcript::from_text("a\n"), &Transcript::from_text("a"));
            assert_eq!(result.diff().unwrap().index, 1);
        }

        #[test]
        fn test_empty_value_differs_from_undefined() {
            let expected = Transcript::from_text("// _level0.c\n\n");
            let actual = Transcript::from_text("// _level0.c\nundefined\n");
            let mismatch = TraceComparator::new().compare(&actual, &expected);
            assert_eq!(mismatch.diff().unwrap().index, 1);
        }
    }
}
