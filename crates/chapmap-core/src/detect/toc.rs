//! Table-of-contents driven detection.
//!
//! A book that lists its chapters up front is segmented by finding the
//! contents heading, parsing the entries beneath it, and locating each
//! entry's header in the body in order.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{book_end, join_lines};

/// Maximum number of lines after the contents heading that may hold entries.
const TOC_ENTRY_WINDOW: usize = 50;

/// Entries shorter than this (in characters, trimmed) are ignored.
const MIN_ENTRY_CHARS: usize = 5;

/// Jaccard similarity above which a body line is taken as an entry's title.
const TITLE_MATCH: f64 = 0.8;

/// Jaccard similarity above which a line right after a header is treated
/// as a repeated title and left out of the chapter body.
const TITLE_REPEAT: f64 = 0.7;

static TOC_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:table\s+of\s+contents|contents?|index)\s*$").unwrap()
});

static PREFIXED_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(chapter\s+|chap\.\s*|part\s+|book\s+)([ivxlcdm]+|\d+)\b\.?\s*(?:[:\-—–]\s*)?(.*)$")
        .unwrap()
});

static BARE_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([IVXLCDM]+|\d+)\.\s+(\S.*)$").unwrap());

static PAGE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s*[.·…]{2,}\s*|\s+)\d+\s*$").unwrap());

static TRAILING_DOTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s.·…]+$").unwrap());

static CHAPTER_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*chapter\s+(?:[ivxlcdm]+|\d+)\b").unwrap());

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Prefix {
    Chapter,
    Chap,
    Part,
    Book,
}

impl Prefix {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "chapter" => Some(Prefix::Chapter),
            "chap." => Some(Prefix::Chap),
            "part" => Some(Prefix::Part),
            "book" => Some(Prefix::Book),
            _ => None,
        }
    }

    fn header_pattern(&self) -> &'static str {
        match self {
            Prefix::Chapter => r"chapter\s+",
            Prefix::Chap => r"chap(?:ter\s+|\.\s*)",
            Prefix::Part => r"part\s+",
            Prefix::Book => r"book\s+",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TocEntry {
    prefix: Option<Prefix>,
    label: String,
    number: u32,
    title: String,
}

/// Value of an upper- or lower-case roman numeral, `None` if malformed.
pub(crate) fn roman_to_int(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut total: u32 = 0;
    let mut prev: u32 = 0;
    for c in s.chars().rev() {
        let v = match c.to_ascii_uppercase() {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => return None,
        };
        if v < prev {
            total = total.checked_sub(v)?;
        } else {
            total += v;
            prev = v;
        }
    }
    (total > 0).then_some(total)
}

fn label_number(label: &str) -> Option<u32> {
    if label.chars().all(|c| c.is_ascii_digit()) {
        label.parse().ok()
    } else {
        roman_to_int(label)
    }
}

fn clean_title(raw: &str) -> String {
    let t = PAGE_SUFFIX.replace(raw.trim(), "");
    TRAILING_DOTS.replace(&t, "").trim().to_string()
}

fn parse_entry(line: &str) -> Option<TocEntry> {
    if let Some(caps) = PREFIXED_ENTRY.captures(line) {
        let prefix = Prefix::parse(&caps[1])?;
        let label = caps[2].to_string();
        return Some(TocEntry {
            prefix: Some(prefix),
            number: label_number(&label)?,
            label,
            title: clean_title(&caps[3]),
        });
    }
    let caps = BARE_ENTRY.captures(line)?;
    let label = caps[1].to_string();
    Some(TocEntry {
        prefix: None,
        number: label_number(&label)?,
        label,
        title: clean_title(&caps[2]),
    })
}

fn word_set(s: &str) -> HashSet<String> {
    WORD.find_iter(s)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Word-set Jaccard similarity, 0.0 when either side has no words.
fn title_similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    inter / union
}

fn header_regex(entry: &TocEntry) -> Option<Regex> {
    let label = regex::escape(&entry.label);
    let pattern = match entry.prefix {
        Some(prefix) => format!(r"(?i)^\s*{}{}\b", prefix.header_pattern(), label),
        None => format!(
            r"^\s*(?:(?i:chapter)\s+{label}\b|{label}\.(?:\s|$)|{label}\s*$)",
            label = label
        ),
    };
    Regex::new(&pattern).ok()
}

/// Parse entries below the heading at `heading`.
///
/// Returns the entries and the line of the last one. Parsing stops at the
/// first repeated entry, which means the body has started.
fn parse_entries(lines: &[&str], heading: usize) -> (Vec<TocEntry>, usize) {
    let mut entries: Vec<TocEntry> = Vec::new();
    let mut seen: HashSet<(Option<Prefix>, u32)> = HashSet::new();
    let mut last_line = heading;

    let end = (heading + 1 + TOC_ENTRY_WINDOW).min(lines.len());
    for (i, line) in lines.iter().enumerate().take(end).skip(heading + 1) {
        if line.trim().chars().count() < MIN_ENTRY_CHARS {
            continue;
        }
        let Some(entry) = parse_entry(line) else {
            continue;
        };
        if !seen.insert((entry.prefix, entry.number)) {
            break;
        }
        entries.push(entry);
        last_line = i;
    }

    (entries, last_line)
}

/// Find each entry's header line, strictly in order, starting at `from`.
fn locate(lines: &[&str], entries: &[TocEntry], from: usize) -> Vec<(usize, usize)> {
    let mut located = Vec::new();
    let mut cursor = from;

    for (idx, entry) in entries.iter().enumerate() {
        let regex = header_regex(entry);
        let hit = (cursor..lines.len()).find(|&i| {
            let line = lines[i];
            if regex.as_ref().is_some_and(|r| r.is_match(line)) {
                return true;
            }
            !entry.title.is_empty() && title_similarity(line, &entry.title) > TITLE_MATCH
        });
        if let Some(line) = hit {
            located.push((idx, line));
            cursor = line + 1;
        }
    }

    located
}

/// First body line after the header at `header`, skipping blank lines,
/// repeated titles and further chapter-header lines.
fn body_start(lines: &[&str], header: usize, end: usize, title: &str) -> usize {
    let mut start = header + 1;
    while start < end {
        let line = lines[start];
        let skip = line.trim().is_empty()
            || CHAPTER_HEADER.is_match(line)
            || (!title.is_empty() && title_similarity(line, title) > TITLE_REPEAT);
        if !skip {
            break;
        }
        start += 1;
    }
    start
}

/// Segment `lines` by their table of contents.
///
/// Returns `None` when no contents heading is found within `scan_lines`
/// lines, when it lists no entries, or when fewer than half of its entries
/// can be located in the body.
pub fn segments_from_toc(lines: &[&str], scan_lines: usize) -> Option<Vec<String>> {
    let heading = lines
        .iter()
        .take(scan_lines)
        .position(|l| TOC_HEADING.is_match(l))?;

    let (entries, toc_end) = parse_entries(lines, heading);
    if entries.is_empty() {
        return None;
    }

    let located = locate(lines, &entries, toc_end + 1);
    tracing::debug!(
        entries = entries.len(),
        located = located.len(),
        "table of contents parsed"
    );
    if located.is_empty() || located.len() * 2 < entries.len() {
        return None;
    }

    let segments = located
        .iter()
        .enumerate()
        .map(|(k, &(entry_idx, header))| {
            let end = match located.get(k + 1) {
                Some(&(_, next)) => next,
                None => book_end(lines, header + 10).max(header + 1),
            };
            let start = body_start(lines, header, end, &entries[entry_idx].title);
            join_lines(&lines[start..end])
        })
        .collect();

    Some(segments)
}
