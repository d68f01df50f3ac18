//! Text utilities shared by detection and normalization.
//!
//! Word counting, paragraph splitting under a configurable
//! [`ParagraphPolicy`], and content hashing for stored chapters.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Separator used whenever paragraphs or segments are re-joined.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

static BLANK_LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

static BLANK_LINE_OR_HTML_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\n\s*\n|</p>|<br\s*/?>").unwrap());

/// Number of `\w+` runs in `text`.
pub fn word_count(text: &str) -> usize {
    WORD.find_iter(text).count()
}

/// Which markers delimit paragraphs.
///
/// Blank lines always do. `</p>`, `<br>` and `<br/>` tags do when
/// `html_breaks` is set, which is what imported HTML-ish book texts need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParagraphPolicy {
    pub html_breaks: bool,
}

impl Default for ParagraphPolicy {
    fn default() -> Self {
        Self { html_breaks: true }
    }
}

impl ParagraphPolicy {
    pub fn blank_lines_only() -> Self {
        Self { html_breaks: false }
    }

    fn boundary(&self) -> &'static Regex {
        if self.html_breaks {
            &BLANK_LINE_OR_HTML_BREAK
        } else {
            &BLANK_LINE_BREAK
        }
    }

    /// Split `text` into trimmed, non-blank paragraphs.
    pub fn paragraphs<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.boundary()
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Whether `text` contains at least one paragraph boundary.
    pub fn has_boundary(&self, text: &str) -> bool {
        self.boundary().is_match(text)
    }
}

/// Split `text` at its character midpoint.
///
/// The left half always receives at least one character when the text is
/// non-empty, so a one-character segment splits into itself and "".
pub fn split_at_char_midpoint(text: &str) -> (String, String) {
    let chars = text.chars().count();
    let mid_chars = (chars / 2).max(1).min(chars);
    let byte_mid = text
        .char_indices()
        .nth(mid_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    (text[..byte_mid].to_string(), text[byte_mid..].to_string())
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
