//! Paragraph accumulation by word budget.

use crate::text::{word_count, ParagraphPolicy, PARAGRAPH_SEPARATOR};

/// Split `text` into segments of roughly `words_per_segment` words.
///
/// Paragraphs are accumulated greedily; a segment is closed when adding the
/// next paragraph would push it past 1.2× the budget. A trailing segment
/// under 0.3× the budget is folded into the one before it.
pub fn segment_by_word_count(
    text: &str,
    words_per_segment: usize,
    policy: &ParagraphPolicy,
) -> Vec<String> {
    let budget = words_per_segment.max(1);
    let ceiling = budget + budget / 5;
    let tail_floor = (budget * 3 / 10).max(1);

    let mut segments: Vec<(Vec<&str>, usize)> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    for para in policy.paragraphs(text) {
        let words = word_count(para);
        if !current.is_empty() && current_words + words > ceiling {
            segments.push((std::mem::take(&mut current), current_words));
            current_words = 0;
        }
        current.push(para);
        current_words += words;
    }

    if !current.is_empty() {
        match segments.last_mut() {
            Some((prev, prev_words)) if current_words < tail_floor => {
                prev.extend(current);
                *prev_words += current_words;
            }
            _ => segments.push((current, current_words)),
        }
    }

    if segments.is_empty() {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    segments
        .into_iter()
        .map(|(paras, _)| paras.join(PARAGRAPH_SEPARATOR))
        .collect()
}
