//! Unicode-safe text buffer.
//!
//! RTT positions and counts on the wire are measured in Unicode code points,
//! never in UTF-16 code units or UTF-8 bytes. `TextBuffer` stores one `char`
//! per code point so every index operation is a plain slice operation and a
//! surrogate pair can never be split.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UnicodeError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextBuffer {
    chars: Vec<char>,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode UTF-16 code units, rejecting unpaired surrogates.
    pub fn from_utf16(units: &[u16]) -> Result<Self, UnicodeError> {
        let mut chars = Vec::with_capacity(units.len());
        let mut index = 0;
        for decoded in char::decode_utf16(units.iter().copied()) {
            match decoded {
                Ok(c) => {
                    index += c.len_utf16();
                    chars.push(c);
                }
                Err(err) if (0xD800..=0xDBFF).contains(&err.unpaired_surrogate()) => {
                    return Err(UnicodeError::UnpairedHighSurrogate { index });
                }
                Err(_) => return Err(UnicodeError::UnpairedLowSurrogate { index }),
            }
        }
        Ok(Self { chars })
    }

    /// Encode as UTF-16 code units.
    pub fn to_utf16(&self) -> Vec<u16> {
        let mut units = Vec::with_capacity(self.chars.len());
        let mut buf = [0u16; 2];
        for c in &self.chars {
            units.extend_from_slice(c.encode_utf16(&mut buf));
        }
        units
    }

    /// Number of code points.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn as_slice(&self) -> &[char] {
        &self.chars
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        self.chars.get(index).copied()
    }

    /// Insert `text` before code point `pos`. Positions past the end append.
    pub fn insert(&mut self, pos: usize, text: &[char]) -> &mut Self {
        let pos = pos.min(self.chars.len());
        if pos == self.chars.len() {
            self.chars.extend_from_slice(text);
        } else {
            self.chars.splice(pos..pos, text.iter().copied());
        }
        self
    }

    pub fn insert_str(&mut self, pos: usize, text: &str) -> &mut Self {
        let chars: Vec<char> = text.chars().collect();
        self.insert(pos, &chars)
    }

    /// Remove `count` code points starting at `pos` (forward from `pos`).
    ///
    /// `pos` is clamped into `[0, len - 1]`, so a position at or past the end
    /// still removes the final code point when `count > 0`; `count` is clamped
    /// to what remains.
    pub fn remove(&mut self, pos: usize, count: usize) -> &mut Self {
        if self.chars.is_empty() {
            return self;
        }
        let pos = pos.min(self.chars.len() - 1);
        let count = count.min(self.chars.len() - pos);
        self.chars.drain(pos..pos + count);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.chars.clear();
        self
    }

    /// Copy of the code points in `[start, end)`, clamped to the buffer.
    pub fn substring(&self, start: usize, end: usize) -> TextBuffer {
        let end = end.min(self.chars.len());
        let start = start.min(end);
        TextBuffer {
            chars: self.chars[start..end].to_vec(),
        }
    }
}

impl fmt::Display for TextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = self.chars.iter().collect();
        f.write_str(&s)
    }
}

impl From<&str> for TextBuffer {
    fn from(s: &str) -> Self {
        Self {
            chars: s.chars().collect(),
        }
    }
}

impl From<String> for TextBuffer {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Vec<char>> for TextBuffer {
    fn from(chars: Vec<char>) -> Self {
        Self { chars }
    }
}

impl From<&[char]> for TextBuffer {
    fn from(chars: &[char]) -> Self {
        Self {
            chars: chars.to_vec(),
        }
    }
}
