//! Bounded linear-time text diff.
//!
//! Finds the common prefix and the common suffix of two texts and reports
//! the middle as at most one erase followed by one insert. Exact for a single
//! contiguous change, which is what a keystroke-granularity text box
//! produces; multi-point changes collapse into one wider replacement.

use serde::{Deserialize, Serialize};

use crate::text::TextBuffer;

/// Erase of `count` code points ending (exclusive) at `pos`, in wire terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseSpan {
    pub pos: usize,
    pub count: usize,
}

/// Insert of `text` before code point `pos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSpan {
    pub pos: usize,
    pub text: Vec<char>,
}

impl InsertSpan {
    pub fn text_string(&self) -> String {
        self.text.iter().collect()
    }
}

/// Result of [`string_diff`]. The erase applies before the insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDiff {
    pub erase: Option<EraseSpan>,
    pub insert: Option<InsertSpan>,
}

impl TextDiff {
    pub fn is_empty(&self) -> bool {
        self.erase.is_none() && self.insert.is_none()
    }

    /// Apply the erase, then the insert, to `text`.
    pub fn apply_to(&self, text: &mut TextBuffer) {
        if let Some(erase) = self.erase {
            text.remove(erase.pos.saturating_sub(erase.count), erase.count);
        }
        if let Some(insert) = &self.insert {
            text.insert(insert.pos, &insert.text);
        }
    }
}

/// Compute the erase/insert pair turning `old` into `new`.
pub fn string_diff(old: &[char], new: &[char]) -> TextDiff {
    let max_fwd = old.len().min(new.len());
    let match_fwd = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();

    // The suffix may not overlap the prefix in either string.
    let max_back = max_fwd - match_fwd;
    let match_back = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_back)
        .take_while(|(a, b)| a == b)
        .count();

    let matched = match_fwd + match_back;
    let erase = (matched < old.len()).then(|| EraseSpan {
        pos: old.len() - match_back,
        count: old.len() - matched,
    });
    let insert = (matched < new.len()).then(|| InsertSpan {
        pos: match_fwd,
        text: new[match_fwd..new.len() - match_back].to_vec(),
    });
    TextDiff { erase, insert }
}
