//! Chapter boundary detection.
//!
//! Turns raw book text into an ordered list of [`DetectedSegment`]s.
//!
//! # Strategies
//!
//! | Mode | Strategy |
//! |------|----------|
//! | keep-original | table of contents, then direct header patterns |
//! | auto-wordcount | paragraph accumulation by word budget |
//!
//! Structural detection may legitimately find nothing; the result is then
//! an empty segment list tagged [`DetectionMethod::None`].

pub mod patterns;
pub mod toc;
pub mod wordcount;

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{DetectedSegment, DetectionMethod, Mode, ReadingAge};
use crate::text::ParagraphPolicy;

/// Lines that mark the end of the story proper.
static END_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:the\s+end\.?|end\s+of\s+(?:the\s+|this\s+)?project\s+gutenberg.*|\*{3}\s*end\s+of\s+(?:the\s+|this\s+)project\s+gutenberg.*)\s*$",
    )
    .unwrap()
});

/// Index of the first end-of-book marker at or after `from`, or
/// `lines.len()` if there is none.
pub(crate) fn book_end(lines: &[&str], from: usize) -> usize {
    (from..lines.len())
        .find(|&i| END_MARKER.is_match(lines[i]))
        .unwrap_or(lines.len())
}

pub(crate) fn join_lines(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}

/// Detection settings.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub mode: Mode,
    /// Word budget for auto-wordcount segmentation.
    pub words_per_segment: usize,
    pub paragraphs: ParagraphPolicy,
    /// A header match this many lines or fewer after the previous kept
    /// match is discarded.
    pub min_header_gap: usize,
    /// How far into the book to look for a contents heading.
    pub toc_scan_lines: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            mode: Mode::KeepOriginal,
            words_per_segment: ReadingAge::default().words_per_chapter(),
            paragraphs: ParagraphPolicy::default(),
            min_header_gap: 30,
            toc_scan_lines: 300,
        }
    }
}

impl DetectOptions {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_reading_age(mut self, age: ReadingAge) -> Self {
        self.words_per_segment = age.words_per_chapter();
        self
    }
}

/// Result of [`detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub segments: Vec<DetectedSegment>,
    pub method: DetectionMethod,
    /// Winning header pattern, for [`DetectionMethod::Regex`].
    pub pattern: Option<&'static str>,
}

impl Detection {
    fn from_texts(texts: Vec<String>, method: DetectionMethod, pattern: Option<&'static str>) -> Self {
        Self {
            segments: DetectedSegment::from_texts(texts),
            method,
            pattern,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Detect chapter segments in `text` according to `opts.mode`.
pub fn detect(text: &str, opts: &DetectOptions) -> Detection {
    let detection = match opts.mode {
        Mode::KeepOriginal => detect_structure(text, opts),
        Mode::AutoWordcount => Detection::from_texts(
            wordcount::segment_by_word_count(text, opts.words_per_segment, &opts.paragraphs),
            DetectionMethod::AutoWordcount,
            None,
        ),
    };

    tracing::debug!(
        method = %detection.method,
        pattern = detection.pattern.unwrap_or("-"),
        segments = detection.len(),
        "detection finished"
    );
    detection
}

/// Structural detection: table of contents first, then header patterns.
pub fn detect_structure(text: &str, opts: &DetectOptions) -> Detection {
    let lines: Vec<&str> = text.lines().collect();

    if let Some(texts) = toc::segments_from_toc(&lines, opts.toc_scan_lines) {
        return Detection::from_texts(texts, DetectionMethod::Toc, None);
    }

    match patterns::best_header_match(&lines, opts.min_header_gap) {
        Some(m) => {
            let texts = m
                .header_lines
                .iter()
                .enumerate()
                .map(|(k, &header)| {
                    let end = match m.header_lines.get(k + 1) {
                        Some(&next) => next,
                        None => book_end(&lines, header + 10).max(header + 1),
                    };
                    join_lines(&lines[header + 1..end])
                })
                .collect();
            Detection::from_texts(texts, DetectionMethod::Regex, Some(m.name))
        }
        None => Detection {
            segments: Vec::new(),
            method: DetectionMethod::None,
            pattern: None,
        },
    }
}

/// Summary of a book's own chapter structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureAnalysis {
    pub has_original_chapters: bool,
    pub chapter_count: usize,
    pub method: DetectionMethod,
    pub pattern: Option<&'static str>,
    pub average_words: usize,
    /// Suggested mode for this book.
    pub recommendation: Mode,
}

/// Run structural detection and recommend a mode.
///
/// Keep-original is recommended for at least three chapters averaging more
/// than 500 words; anything less is better served by word-count
/// segmentation.
pub fn analyze(text: &str, opts: &DetectOptions) -> StructureAnalysis {
    let detection = detect_structure(text, opts);
    let count = detection.len();
    let total: usize = detection.segments.iter().map(|s| s.word_count).sum();
    let average_words = if count == 0 { 0 } else { total / count };

    let recommendation = if count >= 3 && average_words > 500 {
        Mode::KeepOriginal
    } else {
        Mode::AutoWordcount
    };

    StructureAnalysis {
        has_original_chapters: count > 0,
        chapter_count: count,
        method: detection.method,
        pattern: detection.pattern,
        average_words,
        recommendation,
    }
}
