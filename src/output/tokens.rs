//! Deterministic token-budget estimation.
//!
//! Text is split on Unicode word boundaries. A run of whitespace is one unit;
//! any other segment costs one unit per started group of four characters.
//! The same pieces drive both counting and truncation, so a truncated text
//! never re-measures above the limit it was cut to.

use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

const CHARS_PER_UNIT: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn new() -> Self {
        Self
    }

    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.split_word_bounds().map(segment_cost).sum()
    }

    /// Cost of `data` in its canonical (2-space pretty JSON) text form.
    pub fn estimate_structured<T: Serialize + ?Sized>(&self, data: &T) -> usize {
        match serde_json::to_string_pretty(data) {
            Ok(text) => self.estimate(&text),
            Err(e) => {
                tracing::warn!("Could not serialize value for estimation: {}", e);
                0
            }
        }
    }

    pub fn fits(&self, text: &str, limit: usize) -> bool {
        self.estimate(text) <= limit
    }

    /// Shorten `text` to at most `limit` units, suffix included.
    ///
    /// The suffix is appended only when something was cut. When the suffix
    /// alone does not fit, the text is cut to `limit` without it.
    pub fn truncate(&self, text: &str, limit: usize, suffix: &str) -> String {
        if text.is_empty() || self.fits(text, limit) {
            return text.to_string();
        }

        let suffix_cost = self.estimate(suffix);
        let (budget, suffix) = if suffix_cost < limit {
            (limit - suffix_cost, suffix)
        } else {
            (limit, "")
        };

        let pieces = pieces(text);
        let mut keep = budget.min(pieces.len());
        loop {
            let mut out: String = pieces[..keep].concat();
            out.push_str(suffix);
            if keep == 0 || self.estimate(&out) <= limit {
                return out;
            }
            keep -= 1;
        }
    }

    pub fn estimate_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t.as_ref())).collect()
    }

    /// Units per character; 0.0 for empty text.
    pub fn token_text_ratio(&self, text: &str) -> f64 {
        let chars = text.chars().count();
        if chars == 0 {
            return 0.0;
        }
        self.estimate(text) as f64 / chars as f64
    }
}

fn segment_cost(segment: &str) -> usize {
    if segment.chars().all(char::is_whitespace) {
        1
    } else {
        segment.chars().count().div_ceil(CHARS_PER_UNIT)
    }
}

/// Split text into the units counted by [`TokenEstimator::estimate`].
fn pieces(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for segment in text.split_word_bounds() {
        if segment.chars().all(char::is_whitespace) {
            out.push(segment);
            continue;
        }
        let mut start = 0;
        let mut count = 0;
        for (idx, _) in segment.char_indices() {
            if count == CHARS_PER_UNIT {
                out.push(&segment[start..idx]);
                start = idx;
                count = 0;
            }
            count += 1;
        }
        out.push(&segment[start..]);
    }
    out
}
