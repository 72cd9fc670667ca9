//! Per-example feature extraction
//!
//! Turns one `(sentence, arg1, arg2, label)` record into a [`RelationExample`]:
//! padded tokens plus every position-aware sequence the scorers consume
//! (validity mask, entity indicator, distance buckets, context windows and the
//! three piecewise masks).

use serde::{Deserialize, Serialize};

use crate::utils::error::{RelExtError, Result};

/// Padding token appended to every sentence
pub const PAD_TOKEN: &str = "<PAD>";

/// Out-of-vocabulary token
pub const UNK_TOKEN: &str = "<UNK>";

/// Number of pad tokens appended after the last real token
pub const PAD_HEADROOM: usize = 5;

/// Entity indicator values
pub const INDICATOR_OTHER: u8 = 1;
pub const INDICATOR_ARG1: u8 = 2;
pub const INDICATOR_ARG2: u8 = 3;

/// Distance bucket assigned to tokens inside an argument span
pub const AT_ENTITY_BUCKET: usize = 1;

/// Inclusive token span of an argument phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpan {
    pub start: usize,
    pub end: usize,
}

impl ArgSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    fn validate(&self, num_words: usize) -> Result<()> {
        if self.start > self.end || self.end >= num_words {
            return Err(RelExtError::InvalidSpan {
                start: self.start,
                end: self.end,
                len: num_words,
            });
        }
        Ok(())
    }
}

/// Feature extraction hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Largest distance bucket in either direction
    pub max_distance: usize,
    /// Radius of the context window around each argument
    pub context_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_distance: 30,
            context_window: 5,
        }
    }
}

impl FeatureConfig {
    /// Size of the distance-bucket vocabulary (bucket 0 is padding)
    pub fn distance_vocab_size(&self) -> usize {
        2 * self.max_distance + 1
    }
}

/// One immutable training/evaluation sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationExample {
    /// Sequential id assigned by the corpus loader (1-based)
    pub uid: usize,
    /// Source sentence identifier, echoed back in predictions
    pub sent_id: serde_json::Value,
    pub text: String,
    /// Whitespace tokens followed by [`PAD_HEADROOM`] pad tokens
    pub tokens: Vec<String>,
    pub arg1: String,
    pub arg2: String,
    pub arg1_span: ArgSpan,
    pub arg2_span: ArgSpan,
    pub words_mask: Vec<u8>,
    pub entity_indicator: Vec<u8>,
    pub arg1_distance: Vec<usize>,
    pub arg2_distance: Vec<usize>,
    pub arg1_context_mask: Vec<u8>,
    pub arg2_context_mask: Vec<u8>,
    pub piece1_mask: Vec<u8>,
    pub piece2_mask: Vec<u8>,
    pub piece3_mask: Vec<u8>,
    /// Gold relation name
    pub relation: String,
}

impl RelationExample {
    /// Padded sequence length
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of real (non-pad) tokens
    pub fn num_words(&self) -> usize {
        self.tokens.len() - PAD_HEADROOM
    }

    /// Attach corpus provenance
    pub fn with_source(mut self, uid: usize, sent_id: serde_json::Value) -> Self {
        self.uid = uid;
        self.sent_id = sent_id;
        self
    }
}

/// Direction-aware distance bucket of `index` relative to `head`.
///
/// Tokens at or before the head map to `[1, max]`, tokens after it to
/// `[max + 1, 2 * max]`.
pub fn distance_bucket(head: usize, index: usize, max_distance: usize) -> usize {
    if head >= index {
        (head - index + 1).min(max_distance)
    } else {
        (index - head).min(max_distance) + max_distance
    }
}

/// Deterministic feature extractor
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Build the feature bundle for one relation mention.
    ///
    /// Fails with [`RelExtError::InvalidSpan`] when a span is reversed or
    /// reaches past the last real token.
    pub fn extract(
        &self,
        sentence: &str,
        arg1: &str,
        arg2: &str,
        arg1_span: ArgSpan,
        arg2_span: ArgSpan,
        relation: &str,
    ) -> Result<RelationExample> {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        let num_words = words.len();
        arg1_span.validate(num_words)?;
        arg2_span.validate(num_words)?;

        let len = num_words + PAD_HEADROOM;
        let mut tokens: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        tokens.extend(std::iter::repeat(PAD_TOKEN.to_string()).take(PAD_HEADROOM));

        let mut words_mask = vec![0u8; len];
        words_mask[..num_words].fill(1);

        let mut entity_indicator = vec![0u8; len];
        for (i, slot) in entity_indicator.iter_mut().take(num_words).enumerate() {
            // arg2 takes overlapping tokens
            *slot = if arg2_span.contains(i) {
                INDICATOR_ARG2
            } else if arg1_span.contains(i) {
                INDICATOR_ARG1
            } else {
                INDICATOR_OTHER
            };
        }

        // Cut at argument ends, ordered by which argument starts first.
        let (first_cut, second_cut) = if arg2_span.start < arg1_span.start {
            (arg2_span.end, arg1_span.end)
        } else {
            (arg1_span.end, arg2_span.end)
        };
        let piece1_mask = range_mask(len, 0, first_cut);
        let piece2_mask = range_mask(len, first_cut, second_cut);
        let piece3_mask = range_mask(len, second_cut, num_words - 1);

        Ok(RelationExample {
            uid: 0,
            sent_id: serde_json::Value::Null,
            text: sentence.to_string(),
            tokens,
            arg1: arg1.to_string(),
            arg2: arg2.to_string(),
            arg1_span,
            arg2_span,
            words_mask,
            entity_indicator,
            arg1_distance: self.distances(arg1_span, len),
            arg2_distance: self.distances(arg2_span, len),
            arg1_context_mask: self.context_mask(arg1_span, num_words, len),
            arg2_context_mask: self.context_mask(arg2_span, num_words, len),
            piece1_mask,
            piece2_mask,
            piece3_mask,
            relation: relation.to_string(),
        })
    }

    fn distances(&self, span: ArgSpan, len: usize) -> Vec<usize> {
        (0..len)
            .map(|i| {
                if span.contains(i) {
                    AT_ENTITY_BUCKET
                } else {
                    distance_bucket(span.start, i, self.config.max_distance)
                }
            })
            .collect()
    }

    fn context_mask(&self, span: ArgSpan, num_words: usize, len: usize) -> Vec<u8> {
        let lo = span.start.saturating_sub(self.config.context_window);
        let hi = (span.end + self.config.context_window).min(num_words - 1);
        range_mask(len, lo, hi)
    }
}

/// Mask of `len` zeros with ones on `[lo, hi]`; empty when `lo > hi`.
fn range_mask(len: usize, lo: usize, hi: usize) -> Vec<u8> {
    let mut mask = vec![0u8; len];
    if lo <= hi {
        mask[lo..=hi.min(len - 1)].fill(1);
    }
    mask
}
