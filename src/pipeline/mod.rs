pub mod confidence;
pub mod extract;
pub mod lexicon;
pub mod merge;
pub mod normalize;
pub mod patterns;
pub mod types;

pub use extract::{extract, ExtractionError};
pub use merge::{merge, MergeConflict, MergeOutcome};
pub use types::{CandidateEntity, FieldConfidence, SourceSpan};
