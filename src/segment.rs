//! Text segmentation into user-perceived character units.
//!
//! The typing reveal must never split a multi-part character (combining
//! sequence, Hangul syllable, emoji ZWJ cluster) mid-reveal, so text is
//! segmented into grapheme clusters rather than code points. The strategy
//! is chosen once from a ranked list at startup instead of being re-decided
//! per call: extended grapheme clusters first, then legacy clusters, then a
//! degraded per-code-point split that stays usable when neither grapheme
//! algorithm is wanted (e.g. in tests pinning the fallback).

// Rust guideline compliant 2026-02

use unicode_segmentation::UnicodeSegmentation;

/// One way of splitting text into reveal units, from best to worst fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStrategy {
    /// UAX #29 extended grapheme clusters (full fidelity).
    ExtendedGraphemes,
    /// UAX #29 legacy grapheme clusters.
    LegacyGraphemes,
    /// One unit per Unicode scalar value (degraded: ZWJ sequences split).
    CodePoints,
}

/// Ranked fallback chain, best first.
const STRATEGY_RANKING: &[SegmentStrategy] = &[
    SegmentStrategy::ExtendedGraphemes,
    SegmentStrategy::LegacyGraphemes,
    SegmentStrategy::CodePoints,
];

/// Splits text into reveal units using a strategy fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    strategy: SegmentStrategy,
}

impl Segmenter {
    /// Resolve the best available strategy from the ranked list.
    ///
    /// Every strategy in the chain is implemented by `unicode-segmentation`
    /// or the standard library, so resolution always lands on the first
    /// entry; the chain stays explicit so the degraded modes remain
    /// reachable and tested.
    pub fn resolve() -> Self {
        let strategy = STRATEGY_RANKING
            .first()
            .copied()
            .unwrap_or(SegmentStrategy::CodePoints);
        Self { strategy }
    }

    /// Build a segmenter with an explicit strategy.
    pub fn with_strategy(strategy: SegmentStrategy) -> Self {
        Self { strategy }
    }

    /// The strategy this segmenter resolved to.
    pub fn strategy(&self) -> SegmentStrategy {
        self.strategy
    }

    /// Split `text` into an ordered sequence of reveal units.
    ///
    /// Concatenating the returned units always reproduces `text` exactly,
    /// regardless of strategy.
    pub fn segment<'a>(&self, text: &'a str) -> Vec<&'a str> {
        match self.strategy {
            SegmentStrategy::ExtendedGraphemes => text.graphemes(true).collect(),
            SegmentStrategy::LegacyGraphemes => text.graphemes(false).collect(),
            SegmentStrategy::CodePoints => {
                text.char_indices()
                    .map(|(i, c)| &text[i..i + c.len_utf8()])
                    .collect()
            }
        }
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::resolve()
    }
}
