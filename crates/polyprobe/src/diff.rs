//! Line diffs for failure reports.
//!
//! Only used to explain a mismatch to a human; control flow never depends on
//! the shape of a diff.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lines of context kept around each change when rendering
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Kind of a diff line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffTag {
    /// Present on both sides
    Same,
    /// Only in the expected text
    Removed,
    /// Only in the actual text
    Added,
}

impl DiffTag {
    const fn sigil(self) -> char {
        match self {
            Self::Same => ' ',
            Self::Removed => '-',
            Self::Added => '+',
        }
    }
}

/// A single diff line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    /// What happened to this line
    pub tag: DiffTag,
    /// Line content
    pub text: String,
}

/// Line diff between an expected and an actual text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDiff {
    lines: Vec<DiffLine>,
}

impl TextDiff {
    /// Diff two texts line by line (longest common subsequence)
    #[must_use]
    pub fn lines(expected: &str, actual: &str) -> Self {
        let old: Vec<&str> = expected.lines().collect();
        let new: Vec<&str> = actual.lines().collect();

        // lcs[i][j] = LCS length of old[i..] and new[j..]
        let mut lcs = vec![vec![0usize; new.len() + 1]; old.len() + 1];
        for i in (0..old.len()).rev() {
            for j in (0..new.len()).rev() {
                lcs[i][j] = if old[i] == new[j] {
                    lcs[i + 1][j + 1] + 1
                } else {
                    lcs[i + 1][j].max(lcs[i][j + 1])
                };
            }
        }

        let mut lines = Vec::with_capacity(old.len().max(new.len()));
        let (mut i, mut j) = (0, 0);
        while i < old.len() && j < new.len() {
            if old[i] == new[j] {
                lines.push(DiffLine::new(DiffTag::Same, old[i]));
                i += 1;
                j += 1;
            } else if lcs[i + 1][j] >= lcs[i][j + 1] {
                lines.push(DiffLine::new(DiffTag::Removed, old[i]));
                i += 1;
            } else {
                lines.push(DiffLine::new(DiffTag::Added, new[j]));
                j += 1;
            }
        }
        lines.extend(old[i..].iter().map(|l| DiffLine::new(DiffTag::Removed, l)));
        lines.extend(new[j..].iter().map(|l| DiffLine::new(DiffTag::Added, l)));

        Self { lines }
    }

    /// All diff lines, including unchanged ones
    #[must_use]
    pub fn all_lines(&self) -> &[DiffLine] {
        &self.lines
    }

    /// Whether the two texts had identical lines
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Number of added plus removed lines
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.lines.iter().filter(|l| l.tag != DiffTag::Same).count()
    }

    /// Render with `context` unchanged lines around each change
    #[must_use]
    pub fn render(&self, context: usize) -> String {
        let keep: Vec<bool> = (0..self.lines.len())
            .map(|idx| {
                let lo = idx.saturating_sub(context);
                let hi = (idx + context + 1).min(self.lines.len());
                self.lines[lo..hi].iter().any(|l| l.tag != DiffTag::Same)
            })
            .collect();

        let mut out = String::new();
        let mut skipped = false;
        for (line, keep) in self.lines.iter().zip(keep) {
            if keep {
                if skipped {
                    out.push_str("  ...\n");
                    skipped = false;
                }
                out.push(line.tag.sigil());
                out.push(' ');
                out.push_str(&line.text);
                out.push('\n');
            } else {
                skipped = true;
            }
        }
        if skipped {
            out.push_str("  ...\n");
        }
        out
    }
}

impl DiffLine {
    fn new(tag: DiffTag, text: &str) -> Self {
        Self {
            tag,
            text: text.to_string(),
        }
    }
}

impl fmt::Display for TextDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(no differences)");
        }
        writeln!(f, "--- expected")?;
        writeln!(f, "+++ actual")?;
        write!(f, "{}", self.render(DEFAULT_CONTEXT_LINES))
    }
}
