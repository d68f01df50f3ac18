//! Merge/split normalization to an exact segment count.
//!
//! Given the detected segments and a target count, [`normalize`] merges
//! the lightest adjacent pairs while there are too many segments and splits
//! the heaviest segment while there are too few. Every step is recorded as
//! an [`Operation`], and each final segment keeps the list of detected
//! indices it was built from.
//!
//! # Invariants
//!
//! - The output has exactly `target` segments.
//! - Every detected index appears in at least one final segment's
//!   `source_indices`, and no other index does.
//! - Identical inputs produce identical segments, operations and lineage.

use std::cmp::Reverse;
use std::num::NonZeroUsize;

use crate::error::RunError;
use crate::models::{DetectedSegment, Operation, SourceMapEntry};
use crate::text::{split_at_char_midpoint, word_count, ParagraphPolicy, PARAGRAPH_SEPARATOR};

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub segments: Vec<String>,
    pub final_map: Vec<SourceMapEntry>,
    /// Merge and split steps in the order they were applied.
    pub operations: Vec<Operation>,
}

impl Normalized {
    pub fn merge_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Merge { .. }))
            .count()
    }

    pub fn split_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Split { .. }))
            .count()
    }
}

struct Working {
    text: String,
    words: usize,
    sources: Vec<usize>,
}

impl Working {
    fn new(text: String, sources: Vec<usize>) -> Self {
        let words = word_count(&text);
        Self {
            text,
            words,
            sources,
        }
    }
}

/// Normalize with the default paragraph policy.
pub fn normalize(segments: &[DetectedSegment], target: NonZeroUsize) -> Result<Normalized, RunError> {
    normalize_with(segments, target, &ParagraphPolicy::default())
}

/// Normalize `segments` to exactly `target` segments.
///
/// Returns [`RunError::EmptyInput`] for an empty segment list.
pub fn normalize_with(
    segments: &[DetectedSegment],
    target: NonZeroUsize,
    policy: &ParagraphPolicy,
) -> Result<Normalized, RunError> {
    if segments.is_empty() {
        return Err(RunError::EmptyInput);
    }
    let target = target.get();

    let mut work: Vec<Working> = segments
        .iter()
        .map(|s| Working {
            text: s.text.clone(),
            words: s.word_count,
            sources: vec![s.index],
        })
        .collect();
    let mut operations = Vec::new();

    while work.len() > target {
        // First pair wins ties.
        let i = (0..work.len() - 1)
            .min_by_key(|&i| work[i].words + work[i + 1].words)
            .unwrap_or(0);
        let right = work.remove(i + 1);
        let left = &mut work[i];
        let lengths_before = [left.words, right.words];

        left.text = format!("{}{}{}", left.text, PARAGRAPH_SEPARATOR, right.text);
        left.words = word_count(&left.text);
        left.sources.extend(right.sources);

        tracing::debug!(at = i, words = left.words, "merged adjacent segments");
        operations.push(Operation::Merge {
            from: [i, i + 1],
            to: i,
            lengths_before,
            lengths_after: [left.words],
        });
    }

    while work.len() < target {
        // First segment wins ties.
        let i = (0..work.len())
            .min_by_key(|&i| Reverse(work[i].words))
            .unwrap_or(0);
        let seg = &work[i];
        let paragraphs = policy.paragraphs(&seg.text);
        let (left_text, right_text) = if paragraphs.len() >= 2 {
            let mid = paragraphs.len().div_ceil(2);
            (
                paragraphs[..mid].join(PARAGRAPH_SEPARATOR),
                paragraphs[mid..].join(PARAGRAPH_SEPARATOR),
            )
        } else {
            split_at_char_midpoint(&seg.text)
        };
        let lengths_before = [seg.words];
        let sources = seg.sources.clone();

        let left = Working::new(left_text, sources.clone());
        let right = Working::new(right_text, sources);
        let lengths_after = [left.words, right.words];
        work[i] = left;
        work.insert(i + 1, right);

        tracing::debug!(at = i, ?lengths_after, "split segment");
        operations.push(Operation::Split {
            from: [i],
            to: i,
            lengths_before,
            lengths_after,
        });
    }

    let final_map = work
        .iter()
        .enumerate()
        .map(|(final_index, w)| SourceMapEntry {
            final_index,
            source_indices: w.sources.clone(),
        })
        .collect();

    Ok(Normalized {
        segments: work.into_iter().map(|w| w.text).collect(),
        final_map,
        operations,
    })
}

/// Build the persisted operation log: `summary` first, followed by as many
/// of `ops` as fit in `max_ops` entries. The summary is always kept.
pub fn cap_operations(summary: Operation, ops: Vec<Operation>, max_ops: usize) -> Vec<Operation> {
    let keep = max_ops.saturating_sub(1);
    let mut out = Vec::with_capacity(keep.min(ops.len()) + 1);
    out.push(summary);
    out.extend(ops.into_iter().take(keep));
    out
}
