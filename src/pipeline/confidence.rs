//! Extraction confidence model.
//!
//! Field scores come from how an entity was recognized (dictionary hit,
//! pattern match, heuristic); the overall score is a weighted mean over
//! the fields a prescription line is expected to carry.

use super::types::FieldConfidence;

/// Confidence thresholds for extraction quality
pub mod extraction_thresholds {
    /// Below this: extraction likely unreliable
    pub const LOW: f32 = 0.50;

    /// Below this: some entity fields may be wrong
    pub const MODERATE: f32 = 0.70;

    /// Above this: high confidence in extracted entities
    pub const HIGH: f32 = 0.85;
}

/// Exact dictionary hit on a known medication name or brand.
pub const DICTIONARY_EXACT: f32 = 1.0;

/// Dosage recognized by the number-unit pattern.
pub const PATTERN_DOSAGE: f32 = 0.9;

/// Duration recognized by the count-period pattern.
pub const PATTERN_DURATION: f32 = 0.9;

/// Explicit frequency phrase ("twice daily", "every 6 hours").
pub const FREQUENCY_PHRASE: f32 = 0.9;

/// Clinical shorthand ("bid", "q8h") and timing codes ("1-0-1").
pub const FREQUENCY_ABBREVIATION: f32 = 0.85;

/// Frequency-shaped text we could not canonicalize; the record keeps
/// the verbatim phrase and falls back to once daily.
pub const FREQUENCY_UNPARSED: f32 = 0.3;

/// Instruction phrase ("with food", "at bedtime").
pub const INSTRUCTION_PHRASE: f32 = 0.8;

/// Name guessed from a dosage-adjacent word with a medication-like
/// suffix, not found in the dictionary.
pub const HEURISTIC_NAME: f32 = 0.7;

const WEIGHT_NAME: f32 = 0.40;
const WEIGHT_DOSAGE: f32 = 0.25;
const WEIGHT_FREQUENCY: f32 = 0.25;
const WEIGHT_DURATION: f32 = 0.10;

/// Weighted overall confidence for one candidate. Missing fields score
/// zero, so a bare name tops out at the name weight.
pub fn overall_confidence(fields: &FieldConfidence) -> f32 {
    let score = fields.name * WEIGHT_NAME
        + fields.dosage * WEIGHT_DOSAGE
        + fields.frequency * WEIGHT_FREQUENCY
        + fields.duration * WEIGHT_DURATION;
    score.clamp(0.0, 1.0)
}
