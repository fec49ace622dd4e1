//! Candidate dedup and merge against stored medications.
//!
//! Two entities describe the same medication when their normalized
//! names match (equal or edit-distance ratio >= 0.85) and their dosages
//! agree or at least one is unset. Merging is field-by-field: the
//! higher-confidence value wins, ties go to the most recent
//! observation. A candidate matching an existing active record updates
//! it in place, so no owner ever holds two active records for the same
//! (normalized name, dosage) pair.

use chrono::{DateTime, Duration, Utc};
use strsim::normalized_levenshtein;
use tracing::debug;
use uuid::Uuid;

use crate::models::{normalize_name, Dosage, MedicationRecord};

use super::confidence;
use super::lexicon;
use super::types::CandidateEntity;

/// Minimum edit-distance ratio for two names to count as the same
/// medication.
pub const NAME_MATCH_RATIO: f64 = 0.85;

/// Result of one merge pass.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Records to persist: updated existing records and newly minted ones.
    pub upserts: Vec<MedicationRecord>,
    /// Field-level ties that were resolved by recency.
    pub conflicts: Vec<MergeConflict>,
}

/// A field where two observations disagreed at equal confidence. The
/// later observation won; the loser is kept for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    pub name: String,
    pub field: &'static str,
    pub kept: String,
    pub discarded: String,
}

/// Consolidate extraction candidates and reconcile them with the
/// owner's stored records.
pub fn merge(
    candidates: &[CandidateEntity],
    existing: &[MedicationRecord],
    owner_id: Uuid,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    // Collapse duplicates within the pass first, in source order.
    let mut groups: Vec<CandidateEntity> = Vec::new();
    for candidate in candidates {
        match groups
            .iter_mut()
            .find(|g| same_medication(&g.name, g.dosage.as_ref(), candidate))
        {
            Some(group) => fold_candidate(group, candidate, &mut outcome.conflicts),
            None => groups.push(candidate.clone()),
        }
    }

    // Then reconcile each group against stored active records.
    let mut updated_ids: Vec<Uuid> = Vec::new();
    for group in &groups {
        let matched = existing.iter().find(|r| {
            r.is_active
                && !updated_ids.contains(&r.id)
                && same_medication(&r.normalized_name, r.dosage.as_ref(), group)
        });
        match matched {
            Some(record) => {
                updated_ids.push(record.id);
                outcome.upserts.push(apply_to_existing(record, group, now));
            }
            None => outcome
                .upserts
                .push(record_from_candidate(group, owner_id, now)),
        }
    }

    for conflict in &outcome.conflicts {
        debug!(
            name = %conflict.name,
            field = conflict.field,
            kept = %conflict.kept,
            discarded = %conflict.discarded,
            "merge tie resolved by recency"
        );
    }
    outcome
}

fn same_medication(name: &str, dosage: Option<&Dosage>, c: &CandidateEntity) -> bool {
    let names_match =
        name == c.name || normalized_levenshtein(name, &c.name) >= NAME_MATCH_RATIO;
    let dosages_compatible = match (dosage, c.dosage.as_ref()) {
        (Some(a), Some(b)) => a.same_as(b),
        _ => true,
    };
    names_match && dosages_compatible
}

/// Merge `next` into `acc` field-by-field. `next` was observed later,
/// so it wins exact confidence ties.
fn fold_candidate(
    acc: &mut CandidateEntity,
    next: &CandidateEntity,
    conflicts: &mut Vec<MergeConflict>,
) {
    if next.field_confidence.name > acc.field_confidence.name {
        acc.name = next.name.clone();
        acc.field_confidence.name = next.field_confidence.name;
    }

    if let Some(dosage) = next.dosage {
        if acc.dosage.is_none() || next.field_confidence.dosage >= acc.field_confidence.dosage {
            acc.dosage = Some(dosage);
            acc.field_confidence.dosage = acc.field_confidence.dosage.max(next.field_confidence.dosage);
        }
    }

    if next.frequency_phrase.is_some() {
        let next_conf = next.field_confidence.frequency;
        let acc_conf = acc.field_confidence.frequency;
        if acc.frequency_phrase.is_none() || next_conf > acc_conf {
            acc.frequency = next.frequency;
            acc.frequency_phrase = next.frequency_phrase.clone();
            acc.unparsed_frequency = next.unparsed_frequency;
            acc.field_confidence.frequency = next_conf;
        } else if next_conf == acc_conf
            && (next.frequency != acc.frequency
                || next.frequency_phrase != acc.frequency_phrase)
        {
            conflicts.push(MergeConflict {
                name: acc.name.clone(),
                field: "frequency",
                kept: next.frequency_phrase.clone().unwrap_or_default(),
                discarded: acc.frequency_phrase.clone().unwrap_or_default(),
            });
            acc.frequency = next.frequency;
            acc.frequency_phrase = next.frequency_phrase.clone();
            acc.unparsed_frequency = next.unparsed_frequency;
        }
    }

    if next.duration_days.is_some() {
        let next_conf = next.field_confidence.duration;
        let acc_conf = acc.field_confidence.duration;
        if acc.duration_days.is_none() || next_conf > acc_conf {
            acc.duration_days = next.duration_days;
            acc.duration_phrase = next.duration_phrase.clone();
            acc.field_confidence.duration = next_conf;
        } else if next_conf == acc_conf && next.duration_days != acc.duration_days {
            conflicts.push(MergeConflict {
                name: acc.name.clone(),
                field: "duration",
                kept: next.duration_phrase.clone().unwrap_or_default(),
                discarded: acc.duration_phrase.clone().unwrap_or_default(),
            });
            acc.duration_days = next.duration_days;
            acc.duration_phrase = next.duration_phrase.clone();
        }
    }

    if let Some(instructions) = &next.instructions {
        if let Some(current) = &acc.instructions {
            if current != instructions {
                conflicts.push(MergeConflict {
                    name: acc.name.clone(),
                    field: "instructions",
                    kept: instructions.clone(),
                    discarded: current.clone(),
                });
            }
        }
        acc.instructions = Some(instructions.clone());
    }

    acc.span.start = acc.span.start.min(next.span.start);
    acc.span.end = acc.span.end.max(next.span.end);
    acc.confidence = confidence::overall_confidence(&acc.field_confidence);
}

/// Update a stored record with a fresh observation: unset fields fill
/// in, frequency and instructions follow the newest reading, and a new
/// duration restarts the course from now.
fn apply_to_existing(
    record: &MedicationRecord,
    c: &CandidateEntity,
    now: DateTime<Utc>,
) -> MedicationRecord {
    let mut updated = record.clone();

    if updated.dosage.is_none() {
        updated.dosage = c.dosage;
    }
    if c.frequency_phrase.is_some() {
        updated.frequency = c.frequency;
        updated.frequency_phrase = c.frequency_phrase.clone();
    }
    if c.instructions.is_some() {
        updated.instructions = c.instructions.clone();
    }
    if let Some(days) = c.duration_days {
        updated.duration_start = Some(now);
        updated.duration_end = Some(now + Duration::days(days));
    }

    // A parsed frequency resolves an earlier unparsed fallback; a fresh
    // unparsed phrase re-flags the record.
    if c.frequency.is_some() {
        updated.needs_review = false;
    }
    if c.unparsed_frequency {
        updated.needs_review = true;
    }

    updated.updated_at = now;
    updated
}

fn record_from_candidate(
    c: &CandidateEntity,
    owner_id: Uuid,
    now: DateTime<Utc>,
) -> MedicationRecord {
    MedicationRecord {
        id: Uuid::new_v4(),
        owner_id,
        name: lexicon::display_name(&c.name),
        normalized_name: normalize_name(&c.name),
        dosage: c.dosage,
        frequency_phrase: c.frequency_phrase.clone(),
        frequency: c.frequency,
        duration_start: c.duration_days.map(|_| now),
        duration_end: c.duration_days.map(|days| now + Duration::days(days)),
        instructions: c.instructions.clone(),
        needs_review: c.needs_review(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalFrequency, Dosage, DoseUnit};
    use crate::pipeline::types::{FieldConfidence, SourceSpan};

    fn candidate(name: &str, dosage: Option<Dosage>, frequency: Option<CanonicalFrequency>) -> CandidateEntity {
        let fields = FieldConfidence {
            name: 1.0,
            dosage: if dosage.is_some() { 0.9 } else { 0.0 },
            frequency: if frequency.is_some() { 0.9 } else { 0.0 },
            duration: 0.0,
        };
        CandidateEntity {
            name: name.to_string(),
            dosage,
            frequency_phrase: frequency.map(|f| f.to_string()),
            frequency,
            unparsed_frequency: false,
            duration_phrase: None,
            duration_days: None,
            instructions: None,
            span: SourceSpan { start: 0, end: 10 },
            field_confidence: fields,
            confidence: confidence::overall_confidence(&fields),
        }
    }

    fn mg(value: f64) -> Dosage {
        Dosage::new(value, DoseUnit::Mg)
    }

    #[test]
    fn identical_candidates_collapse_to_one_record() {
        let cs = vec![
            candidate("metformin", Some(mg(500.0)), Some(CanonicalFrequency::TwiceDaily)),
            candidate("metformin", Some(mg(500.0)), Some(CanonicalFrequency::TwiceDaily)),
        ];
        let outcome = merge(&cs, &[], Uuid::new_v4(), Utc::now());
        assert_eq!(outcome.upserts.len(), 1);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn different_dosages_stay_separate_records() {
        let cs = vec![
            candidate("metformin", Some(mg(500.0)), None),
            candidate("metformin", Some(mg(850.0)), None),
        ];
        let outcome = merge(&cs, &[], Uuid::new_v4(), Utc::now());
        assert_eq!(outcome.upserts.len(), 2);
    }

    #[test]
    fn unset_dosage_fills_from_duplicate() {
        let cs = vec![
            candidate("aspirin", None, Some(CanonicalFrequency::OnceDaily)),
            candidate("aspirin", Some(mg(75.0)), None),
        ];
        let outcome = merge(&cs, &[], Uuid::new_v4(), Utc::now());
        assert_eq!(outcome.upserts.len(), 1);
        let record = &outcome.upserts[0];
        assert_eq!(record.dosage, Some(mg(75.0)));
        assert_eq!(record.frequency, Some(CanonicalFrequency::OnceDaily));
    }

    #[test]
    fn frequency_tie_goes_to_later_candidate_and_is_recorded() {
        let cs = vec![
            candidate("aspirin", Some(mg(75.0)), Some(CanonicalFrequency::OnceDaily)),
            candidate("aspirin", Some(mg(75.0)), Some(CanonicalFrequency::TwiceDaily)),
        ];
        let outcome = merge(&cs, &[], Uuid::new_v4(), Utc::now());
        assert_eq!(outcome.upserts.len(), 1);
        assert_eq!(
            outcome.upserts[0].frequency,
            Some(CanonicalFrequency::TwiceDaily)
        );
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].field, "frequency");
        assert_eq!(outcome.conflicts[0].kept, "twice daily");
    }

    #[test]
    fn close_names_group_together() {
        // One character dropped: ratio 10/11 = 0.909.
        let cs = vec![
            candidate("glimepiride", Some(mg(2.0)), None),
            candidate("glimepirid", Some(mg(2.0)), Some(CanonicalFrequency::OnceDaily)),
        ];
        let outcome = merge(&cs, &[], Uuid::new_v4(), Utc::now());
        assert_eq!(outcome.upserts.len(), 1);
    }

    #[test]
    fn matching_active_record_updates_in_place() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let first = merge(
            &[candidate("metformin", Some(mg(500.0)), None)],
            &[],
            owner,
            now,
        );
        let stored = first.upserts;
        assert!(stored[0].frequency.is_none());

        let second = merge(
            &[candidate(
                "metformin",
                Some(mg(500.0)),
                Some(CanonicalFrequency::TwiceDaily),
            )],
            &stored,
            owner,
            now + Duration::minutes(5),
        );
        assert_eq!(second.upserts.len(), 1);
        assert_eq!(second.upserts[0].id, stored[0].id);
        assert_eq!(
            second.upserts[0].frequency,
            Some(CanonicalFrequency::TwiceDaily)
        );
    }

    #[test]
    fn inactive_record_does_not_absorb_candidate() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let mut stored = merge(
            &[candidate("aspirin", Some(mg(75.0)), None)],
            &[],
            owner,
            now,
        )
        .upserts;
        stored[0].is_active = false;

        let outcome = merge(
            &[candidate("aspirin", Some(mg(75.0)), None)],
            &stored,
            owner,
            now,
        );
        assert_ne!(outcome.upserts[0].id, stored[0].id);
    }

    #[test]
    fn merge_is_idempotent_against_own_output() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let cs = vec![
            candidate("metformin", Some(mg(500.0)), Some(CanonicalFrequency::TwiceDaily)),
            candidate("aspirin", Some(mg(75.0)), Some(CanonicalFrequency::OnceDaily)),
        ];
        let first = merge(&cs, &[], owner, now);
        assert_eq!(first.upserts.len(), 2);

        let second = merge(&cs, &first.upserts, owner, now);
        assert_eq!(second.upserts.len(), 2);
        let first_ids: Vec<_> = first.upserts.iter().map(|r| r.id).collect();
        assert!(second.upserts.iter().all(|r| first_ids.contains(&r.id)));
    }

    #[test]
    fn unparsed_frequency_candidate_flags_review() {
        let mut c = candidate("aspirin", Some(mg(75.0)), None);
        c.unparsed_frequency = true;
        c.frequency_phrase = Some("every other day".to_string());
        c.field_confidence.frequency = confidence::FREQUENCY_UNPARSED;
        c.confidence = confidence::overall_confidence(&c.field_confidence);

        let outcome = merge(&[c], &[], Uuid::new_v4(), Utc::now());
        let record = &outcome.upserts[0];
        assert!(record.needs_review);
        assert_eq!(record.frequency, None);
        assert_eq!(record.frequency_phrase.as_deref(), Some("every other day"));
    }

    #[test]
    fn parsed_frequency_clears_review_flag_on_update() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let mut c = candidate("aspirin", Some(mg(75.0)), None);
        c.unparsed_frequency = true;
        c.frequency_phrase = Some("every other day".to_string());
        c.field_confidence.frequency = confidence::FREQUENCY_UNPARSED;
        let stored = merge(&[c], &[], owner, now).upserts;
        assert!(stored[0].needs_review);

        let outcome = merge(
            &[candidate(
                "aspirin",
                Some(mg(75.0)),
                Some(CanonicalFrequency::OnceDaily),
            )],
            &stored,
            owner,
            now,
        );
        assert!(!outcome.upserts[0].needs_review);
        assert_eq!(outcome.upserts[0].frequency, Some(CanonicalFrequency::OnceDaily));
    }

    #[test]
    fn duration_restart_runs_from_merge_time() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let mut c = candidate("amoxicillin", Some(mg(500.0)), Some(CanonicalFrequency::ThreeTimesDaily));
        c.duration_days = Some(5);
        c.duration_phrase = Some("for 5 days".to_string());
        c.field_confidence.duration = confidence::PATTERN_DURATION;

        let outcome = merge(&[c], &[], owner, now);
        let record = &outcome.upserts[0];
        assert_eq!(record.duration_start, Some(now));
        assert_eq!(record.duration_end, Some(now + Duration::days(5)));
    }
}
