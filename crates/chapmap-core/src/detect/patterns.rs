//! Direct header-pattern matching.
//!
//! Each pattern is tried over every line of the book. Matches that follow
//! the previously kept match too closely are discarded (a run of numbered
//! list items or a table of contents is not a chapter sequence). The
//! pattern keeping the most matches wins; ties go to the pattern listed
//! first.

use std::sync::LazyLock;

use regex::Regex;

/// A named chapter-header pattern.
pub struct HeaderPattern {
    pub name: &'static str,
    regex: Regex,
}

impl HeaderPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).unwrap(),
        }
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

const SPELLED: &str = "one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|thirteen|\
fourteen|fifteen|sixteen|seventeen|eighteen|nineteen|\
twenty(?:-(?:one|two|three|four|five|six|seven|eight|nine))?|thirty";

/// Ordered header patterns, from most to least specific.
///
/// Keywords are case-insensitive; roman numerals must be upper case so that
/// ordinary words made of roman letters ("did", "mix") never look like
/// numerals.
pub static HEADER_PATTERNS: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    vec![
        HeaderPattern::new(
            "roman_with_title",
            r"^\s*(?i:chapter)\s+[IVXLCDM]+\.\s+[A-Z]",
        ),
        HeaderPattern::new("numeric_with_title", r"^\s*(?i:chapter)\s+\d+\.\s+[A-Z]"),
        HeaderPattern::new(
            "roman_with_separator",
            r"^\s*(?i:chapter)\s+[IVXLCDM]+\s*[:\-—–]\s*\S",
        ),
        HeaderPattern::new(
            "numeric_with_separator",
            r"^\s*(?i:chapter)\s+\d+\s*[:\-—–]\s*\S",
        ),
        HeaderPattern::new("roman_simple", r"^\s*(?i:chapter)\s+[IVXLCDM]+\.?\s*$"),
        HeaderPattern::new("numeric_simple", r"^\s*(?i:chapter)\s+\d+\.?\s*$"),
        HeaderPattern::new("roman_any", r"^\s*(?i:chapter)\s+[IVXLCDM]+\b"),
        HeaderPattern::new("numeric_any", r"^\s*(?i:chapter)\s+\d+\b"),
        HeaderPattern::new("roman_abbreviated", r"^\s*(?i:chap\.)\s*[IVXLCDM]+\b"),
        HeaderPattern::new("numeric_abbreviated", r"^\s*(?i:chap\.)\s*\d+\b"),
        HeaderPattern::new("part_roman", r"^\s*(?i:part)\s+[IVXLCDM]+\b"),
        HeaderPattern::new("part_numeric", r"^\s*(?i:part)\s+\d+\b"),
        HeaderPattern::new("book_roman", r"^\s*(?i:book)\s+[IVXLCDM]+\b"),
        HeaderPattern::new("book_numeric", r"^\s*(?i:book)\s+\d+\b"),
        HeaderPattern::new("roman_minimal", r"^\s*[IVXLCDM]+\.\s+[A-Z]"),
        HeaderPattern::new("numeric_minimal", r"^\s*\d+\.\s+[A-Z]"),
        HeaderPattern::new("roman_centered", r"^\s{10,}(?i:chapter)\s+[IVXLCDM]+\b"),
        HeaderPattern::new("numeric_centered", r"^\s{10,}(?i:chapter)\s+\d+\b"),
        HeaderPattern::new("section_symbol", r"^\s*§\s*\d+"),
        HeaderPattern::new(
            "spelled_out",
            &format!(r"^\s*(?i:chapter\s+(?:{}))\b", SPELLED),
        ),
        HeaderPattern::new(
            "letter_format",
            r"^\s*(?i:letter)\s+(?:[IVXLCDM]+|\d+)\b",
        ),
        HeaderPattern::new("story_format", r"^\s*(?i:story)\s+\d+[:.\s]"),
        HeaderPattern::new("tale_format", r"^\s*(?i:tale)\s+\d+[:.\s]"),
        HeaderPattern::new(
            "stave_format",
            &format!(r"^\s*(?i:stave)\s+(?:[IVXLCDM]+\b|\d+\b|(?i:{})\b)", SPELLED),
        ),
    ]
});

/// The winning pattern and the header lines it kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub name: &'static str,
    pub header_lines: Vec<usize>,
}

/// Keep matches that sit more than `min_gap` lines after the last kept one.
fn spaced(matches: impl Iterator<Item = usize>, min_gap: usize) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for line in matches {
        match kept.last() {
            Some(&last) if line - last <= min_gap => {}
            _ => kept.push(line),
        }
    }
    kept
}

/// Find the best header pattern over `lines`.
///
/// Returns `None` when no pattern keeps at least one match.
pub fn best_header_match(lines: &[&str], min_gap: usize) -> Option<PatternMatch> {
    let mut best: Option<PatternMatch> = None;

    for pattern in HEADER_PATTERNS.iter() {
        let hits = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| pattern.is_match(line))
            .map(|(i, _)| i);
        let kept = spaced(hits, min_gap);
        if kept.is_empty() {
            continue;
        }

        let better = match &best {
            Some(b) => kept.len() > b.header_lines.len(),
            None => true,
        };
        if better {
            best = Some(PatternMatch {
                name: pattern.name,
                header_lines: kept,
            });
        }
    }

    best
}
