use serde::{Deserialize, Serialize};

use crate::models::{CanonicalFrequency, Dosage};

/// Byte range in the normalized source text an entity was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

/// Per-field extraction confidence. Absent fields stay at 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldConfidence {
    pub name: f32,
    pub dosage: f32,
    pub frequency: f32,
    pub duration: f32,
}

/// One medication candidate assembled from a prescription text, before
/// dedup and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Canonical lowercase medication name.
    pub name: String,
    pub dosage: Option<Dosage>,
    /// Verbatim frequency text as it appeared in the source.
    pub frequency_phrase: Option<String>,
    pub frequency: Option<CanonicalFrequency>,
    /// Set when a frequency-shaped phrase was found but not recognized;
    /// the record falls back to once daily and is flagged for review.
    pub unparsed_frequency: bool,
    pub duration_phrase: Option<String>,
    pub duration_days: Option<i64>,
    pub instructions: Option<String>,
    pub span: SourceSpan,
    pub field_confidence: FieldConfidence,
    pub confidence: f32,
}

impl CandidateEntity {
    /// Whether the stored record should be flagged for user review:
    /// unparsed frequency, low overall confidence, or a name that was
    /// guessed rather than found in the dictionary.
    pub fn needs_review(&self) -> bool {
        self.unparsed_frequency
            || self.confidence < super::confidence::extraction_thresholds::MODERATE
            || self.field_confidence.name <= super::confidence::HEURISTIC_NAME
    }
}
