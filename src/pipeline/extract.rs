//! Entity extraction from normalized prescription text.
//!
//! Two passes over the normalized text:
//! - dictionary pass: medication names from the lexicon anchor a
//!   candidate each, then claim nearby dosage/frequency/duration/
//!   instruction matches inside proximity windows
//! - heuristic pass: dosages nobody claimed promote their preceding
//!   word to a low-confidence name when it looks like a drug name
//!
//! Every pattern match is claimed at most once, so two medications on
//! one line keep their own fields.

use thiserror::Error;
use tracing::debug;

use super::confidence;
use super::lexicon;
use super::normalize::normalize;
use super::patterns::{self, spans_overlap};
use super::types::{CandidateEntity, FieldConfidence, SourceSpan};

/// Byte window around a name in which a dosage may be claimed.
const DOSAGE_WINDOW_BEFORE: usize = 50;
const DOSAGE_WINDOW_AFTER: usize = 150;

/// Wider window for frequency, duration, and instructions, which often
/// trail the dosage.
const FREQ_WINDOW_BEFORE: usize = 100;
const FREQ_WINDOW_AFTER: usize = 200;

/// Suffixes that make a dosage-adjacent word plausible as a drug name.
const NAME_SUFFIXES: &[&str] = &[
    "ol", "ine", "ate", "ide", "am", "il", "in", "an", "ar", "er",
];

/// Common words that share the suffixes above. Sorted for binary search.
const HEURISTIC_STOPWORDS: &[&str] = &[
    "after", "again", "certain", "clean", "contain", "late", "maintain", "number", "other",
    "over", "plan", "regular", "scan", "similar", "state", "sugar", "than", "under", "until",
    "water",
];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("prescription text is empty after normalization")]
    EmptyInput,

    #[error("no medication entities recognized: {reason}")]
    NoEntities { reason: String },
}

/// Extract medication candidates from raw OCR text. Candidates come
/// back in source order, each with per-field and overall confidence.
pub fn extract(raw: &str) -> Result<Vec<CandidateEntity>, ExtractionError> {
    let text = normalize(raw);
    if text.is_empty() {
        return Err(ExtractionError::EmptyInput);
    }

    let names = lexicon::find_medication_names(&text);
    let dosages = patterns::find_dosages(&text);
    let frequencies = patterns::find_frequencies(&text);
    let durations = patterns::find_durations(&text);
    let instructions = patterns::find_instructions(&text);

    // Frequency-shaped text only counts as unparsed when no recognized
    // frequency or duration already explains it.
    let shapes: Vec<_> = patterns::find_frequency_shapes(&text)
        .into_iter()
        .filter(|s| {
            !frequencies
                .iter()
                .any(|f| spans_overlap(f.start, f.end, s.start, s.end))
                && !durations
                    .iter()
                    .any(|d| spans_overlap(d.start, d.end, s.start, s.end))
        })
        .collect();

    let mut claims = Claims::new(&dosages, &frequencies, &durations, &instructions, &shapes);
    let mut candidates = Vec::new();

    for name in &names {
        candidates.push(build_candidate(
            name.canonical.to_string(),
            name.confidence,
            name.start,
            name.end,
            &mut claims,
        ));
    }

    // Heuristic pass over dosages the dictionary pass left unclaimed.
    for idx in 0..dosages.len() {
        if claims.dosage[idx] {
            continue;
        }
        let m = &dosages[idx];
        let Some((token, start, end)) = preceding_word(&text, m.start) else {
            continue;
        };
        if !looks_like_drug_name(token)
            || lexicon::exact_lookup(token).is_some()
            || names
                .iter()
                .any(|n| spans_overlap(n.start, n.end, start, end))
        {
            continue;
        }
        debug!(token, "promoting dosage-adjacent word to candidate");
        candidates.push(build_candidate(
            token.to_string(),
            confidence::HEURISTIC_NAME,
            start,
            end,
            &mut claims,
        ));
    }

    if candidates.is_empty() {
        let reason = if dosages.is_empty() && frequencies.is_empty() {
            "no medication names or dosage patterns found".to_string()
        } else {
            "dosage or frequency patterns present but no medication name nearby".to_string()
        };
        return Err(ExtractionError::NoEntities { reason });
    }

    candidates.sort_by_key(|c| c.span.start);
    Ok(candidates)
}

/// Claim state over each pattern list, indexed parallel to the lists.
struct Claims<'a> {
    dosages: &'a [patterns::DosageMatch],
    frequencies: &'a [patterns::FrequencyMatch],
    durations: &'a [patterns::DurationMatch],
    instructions: &'a [patterns::InstructionMatch],
    shapes: &'a [patterns::ShapeMatch],
    dosage: Vec<bool>,
    frequency: Vec<bool>,
    duration: Vec<bool>,
    instruction: Vec<bool>,
    shape: Vec<bool>,
}

impl<'a> Claims<'a> {
    fn new(
        dosages: &'a [patterns::DosageMatch],
        frequencies: &'a [patterns::FrequencyMatch],
        durations: &'a [patterns::DurationMatch],
        instructions: &'a [patterns::InstructionMatch],
        shapes: &'a [patterns::ShapeMatch],
    ) -> Self {
        Self {
            dosages,
            frequencies,
            durations,
            instructions,
            shapes,
            dosage: vec![false; dosages.len()],
            frequency: vec![false; frequencies.len()],
            duration: vec![false; durations.len()],
            instruction: vec![false; instructions.len()],
            shape: vec![false; shapes.len()],
        }
    }
}

fn build_candidate(
    name: String,
    name_confidence: f32,
    name_start: usize,
    name_end: usize,
    claims: &mut Claims<'_>,
) -> CandidateEntity {
    let mut fields = FieldConfidence {
        name: name_confidence,
        ..Default::default()
    };
    let mut span = SourceSpan {
        start: name_start,
        end: name_end,
    };

    let dosage = claim_nearest(
        claims.dosages,
        &mut claims.dosage,
        |m| (m.start, m.end),
        name_start,
        DOSAGE_WINDOW_BEFORE,
        DOSAGE_WINDOW_AFTER,
    )
    .map(|i| {
        fields.dosage = confidence::PATTERN_DOSAGE;
        widen(&mut span, claims.dosages[i].start, claims.dosages[i].end);
        claims.dosages[i].dosage.clone()
    });

    let mut frequency = None;
    let mut frequency_phrase = None;
    if let Some(i) = claim_nearest(
        claims.frequencies,
        &mut claims.frequency,
        |m| (m.start, m.end),
        name_start,
        FREQ_WINDOW_BEFORE,
        FREQ_WINDOW_AFTER,
    ) {
        let m = &claims.frequencies[i];
        fields.frequency = m.confidence;
        frequency = Some(m.frequency);
        frequency_phrase = Some(m.phrase.clone());
        widen(&mut span, m.start, m.end);
    }

    // A frequency-shaped phrase we could not canonicalize still claims
    // the frequency slot, at low confidence.
    let mut unparsed_frequency = false;
    if frequency.is_none() {
        if let Some(i) = claim_nearest(
            claims.shapes,
            &mut claims.shape,
            |m| (m.start, m.end),
            name_start,
            FREQ_WINDOW_BEFORE,
            FREQ_WINDOW_AFTER,
        ) {
            let m = &claims.shapes[i];
            unparsed_frequency = true;
            fields.frequency = confidence::FREQUENCY_UNPARSED;
            frequency_phrase = Some(m.phrase.clone());
            widen(&mut span, m.start, m.end);
        }
    }

    let mut duration_phrase = None;
    let mut duration_days = None;
    if let Some(i) = claim_nearest(
        claims.durations,
        &mut claims.duration,
        |m| (m.start, m.end),
        name_start,
        FREQ_WINDOW_BEFORE,
        FREQ_WINDOW_AFTER,
    ) {
        let m = &claims.durations[i];
        fields.duration = confidence::PATTERN_DURATION;
        duration_phrase = Some(m.phrase.clone());
        duration_days = Some(m.days);
        widen(&mut span, m.start, m.end);
    }

    let mut claimed_instructions = Vec::new();
    for (i, m) in claims.instructions.iter().enumerate() {
        if claims.instruction[i]
            || !in_window(m.start, name_start, FREQ_WINDOW_BEFORE, FREQ_WINDOW_AFTER)
        {
            continue;
        }
        claims.instruction[i] = true;
        claimed_instructions.push(m.phrase);
        widen(&mut span, m.start, m.end);
    }
    let instructions = if claimed_instructions.is_empty() {
        None
    } else {
        Some(claimed_instructions.join("; "))
    };

    let confidence = confidence::overall_confidence(&fields);
    CandidateEntity {
        name,
        dosage,
        frequency_phrase,
        frequency,
        unparsed_frequency,
        duration_phrase,
        duration_days,
        instructions,
        span,
        field_confidence: fields,
        confidence,
    }
}

/// Claim the unclaimed match nearest to the name, within the window.
fn claim_nearest<T>(
    matches: &[T],
    claimed: &mut [bool],
    span_of: impl Fn(&T) -> (usize, usize),
    name_start: usize,
    before: usize,
    after: usize,
) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (i, m) in matches.iter().enumerate() {
        let (start, _) = span_of(m);
        if claimed[i] || !in_window(start, name_start, before, after) {
            continue;
        }
        let distance = start.abs_diff(name_start);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((i, distance));
        }
    }
    let (idx, _) = best?;
    claimed[idx] = true;
    Some(idx)
}

fn in_window(pos: usize, anchor: usize, before: usize, after: usize) -> bool {
    pos >= anchor.saturating_sub(before) && pos <= anchor + after
}

fn widen(span: &mut SourceSpan, start: usize, end: usize) {
    span.start = span.start.min(start);
    span.end = span.end.max(end);
}

/// Last whole word before `pos`, with its byte span.
fn preceding_word(text: &str, pos: usize) -> Option<(&str, usize, usize)> {
    let prefix = text[..pos].trim_end();
    let end = prefix.len();
    let start = prefix
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphabetic())
        .last()
        .map(|(i, _)| i)?;
    if start == end {
        return None;
    }
    Some((&prefix[start..end], start, end))
}

fn looks_like_drug_name(token: &str) -> bool {
    token.len() >= 4
        && token.chars().all(|c| c.is_ascii_alphabetic())
        && NAME_SUFFIXES.iter().any(|s| token.ends_with(s))
        && HEURISTIC_STOPWORDS.binary_search(&token).is_err()
}
