//! Chunking: partition document text into bounded-size units.
//!
//! The chunker is the only non-trivial algorithm in the crate and the
//! contract the whole pipeline rests on: concatenating all units' text in
//! ordinal order must reproduce the document's word sequence exactly - no
//! word dropped, none duplicated - in either mode.
//!
//! ## Modes
//!
//! * [`ChunkMode::FixedWindow`] - split on whitespace and group consecutive
//!   words into windows of `max_words`; the final window may be shorter.
//!   Hard cap, may split mid-sentence.
//! * [`ChunkMode::PreserveSentences`] - segment into sentences (UAX #29) and
//!   greedily accumulate whole sentences while the running word count stays
//!   within `max_words`. A single sentence longer than `max_words` is kept
//!   whole in its own unit; the cap yields to sentence integrity, never the
//!   other way round.
//!
//! ## Sanitisation
//!
//! Before segmentation the text is stripped of characters outside the Basic
//! Multilingual Plane (emoji, rare symbols) - the downstream transport
//! rejects them. Stripping happens before word counting so counts always
//! describe what will actually be submitted.

use crate::config::ChunkMode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use unicode_segmentation::UnicodeSegmentation;

/// Matches any character outside the BMP (above U+FFFF).
static NON_BMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\x{0000}-\x{FFFF}]").expect("static regex"));

/// One bounded-size slice of the source document - the atomic item of work.
///
/// Units are created once by [`chunk`] and never mutated. The ordinal index
/// defines output order and doubles as the resume cursor: a sink that already
/// holds `n` records causes units `0..n` to be skipped on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Position in the chunk sequence; defines output order.
    pub ordinal: usize,
    /// The text to submit, already sanitised.
    pub text: String,
    /// Whether this unit was cut on sentence boundaries.
    pub sentence_aligned: bool,
}

impl Unit {
    /// Number of whitespace-separated words in this unit.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Remove characters outside the Basic Multilingual Plane.
///
/// Idempotent, and a no-op (borrowing the input) when nothing needs
/// stripping. Word counts of surviving characters are unchanged.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    NON_BMP.replace_all(text, "")
}

/// Partition `text` into ordered [`Unit`]s of at most `max_words` words.
///
/// An empty or whitespace-only document yields an empty vector - "nothing to
/// do", not an error. `max_words` of zero is treated as one.
pub fn chunk(text: &str, max_words: usize, mode: ChunkMode) -> Vec<Unit> {
    let max_words = max_words.max(1);
    let text = sanitize(text);

    match mode {
        ChunkMode::FixedWindow => fixed_windows(&text, max_words),
        ChunkMode::PreserveSentences => sentence_windows(&text, max_words),
    }
}

/// Segment text into trimmed, non-empty sentences (UAX #29 boundaries).
pub fn sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn fixed_windows(text: &str, max_words: usize) -> Vec<Unit> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words)
        .enumerate()
        .map(|(ordinal, window)| Unit {
            ordinal,
            text: window.join(" "),
            sentence_aligned: false,
        })
        .collect()
}

fn sentence_windows(text: &str, max_words: usize) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    let mut push_unit = |buf: &mut Vec<&str>, units: &mut Vec<Unit>| {
        if !buf.is_empty() {
            units.push(Unit {
                ordinal: units.len(),
                text: buf.join(" "),
                sentence_aligned: true,
            });
            buf.clear();
        }
    };

    for sentence in sentences(text) {
        let words = sentence.split_whitespace().count();
        if words == 0 {
            continue;
        }
        // Close the open unit before it would overflow. An oversized
        // sentence lands alone in the next unit, whole.
        if current_words + words > max_words && !current.is_empty() {
            push_unit(&mut current, &mut units);
            current_words = 0;
        }
        current.push(sentence);
        current_words += words;
    }
    push_unit(&mut current, &mut units);

    units
}
