//! Medication service: prescription intake and schedule management.
//!
//! The write path for everything except firing: process a prescription
//! end to end (extract → merge → store → slots), manual entry and
//! edits, frequency changes, dose-time tweaks. Firing state
//! (`next_due_at`, `last_fired_at`) is never written here; that belongs
//! to the scheduler thread alone.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{repository, DatabaseError};
use crate::models::{
    initial_next_due, normalize_name, CanonicalFrequency, Dosage, MedicationRecord, ReminderSlot,
};
use crate::notify::{Notifier, NotifyEvent, NotifyKind};
use crate::pipeline::{self, patterns, MergeConflict};
use crate::schedule::translate::translate;

/// What processing one prescription text produced.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Stored records, updated and newly created.
    pub records: Vec<MedicationRecord>,
    /// Field disagreements the merge resolved by recency.
    pub conflicts: Vec<MergeConflict>,
    /// Why nothing was stored, when `records` is empty.
    pub discarded: Option<String>,
}

/// Run the full pipeline on one prescription text and persist the
/// result for `owner_id`.
///
/// Text that yields no candidates is an outcome, not an error: the
/// reason lands in [`ProcessOutcome::discarded`] and nothing changes.
pub fn process_prescription(
    conn: &Connection,
    notifier: &dyn Notifier,
    raw_text: &str,
    owner_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ProcessOutcome, DatabaseError> {
    let candidates = match pipeline::extract(raw_text) {
        Ok(candidates) => candidates,
        Err(e) => {
            info!(owner_id = %owner_id, reason = %e, "Prescription yielded no candidates");
            return Ok(ProcessOutcome {
                discarded: Some(e.to_string()),
                ..ProcessOutcome::default()
            });
        }
    };

    let existing = repository::list_active_medications(conn, &owner_id)?;
    let known: HashMap<Uuid, Option<CanonicalFrequency>> = existing
        .iter()
        .map(|record| (record.id, record.effective_frequency()))
        .collect();

    let outcome = pipeline::merge(&candidates, &existing, owner_id, now);

    let mut records = Vec::with_capacity(outcome.upserts.len());
    for record in outcome.upserts {
        repository::upsert_medication(conn, &record)?;
        sync_slots(conn, &record, known.get(&record.id).copied(), now)?;

        let kind = if known.contains_key(&record.id) {
            NotifyKind::MedicationUpdated
        } else {
            NotifyKind::MedicationAdded
        };
        send_notice(notifier, &record, kind);
        records.push(record);
    }

    info!(
        owner_id = %owner_id,
        stored = records.len(),
        conflicts = outcome.conflicts.len(),
        "Prescription processed"
    );

    Ok(ProcessOutcome {
        records,
        conflicts: outcome.conflicts,
        discarded: None,
    })
}

/// Re-parse a frequency phrase for one medication and rebuild its
/// slots. An unrecognized phrase falls back to once daily and flags the
/// record for review until the owner confirms.
pub fn set_frequency(
    conn: &Connection,
    notifier: &dyn Notifier,
    medication_id: &Uuid,
    phrase: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ReminderSlot>, DatabaseError> {
    let mut record = repository::get_medication(conn, medication_id)?;
    let parsed = patterns::parse_frequency_phrase(phrase);

    record.frequency_phrase = Some(phrase.trim().to_string());
    record.frequency = parsed;
    record.needs_review = parsed.is_none();
    record.updated_at = now;
    repository::upsert_medication(conn, &record)?;

    let effective = parsed.unwrap_or(CanonicalFrequency::OnceDaily);
    let slots = build_slots(&record, &translate(effective, None), now);
    repository::replace_active_slots(conn, medication_id, &slots)?;

    if parsed.is_none() {
        info!(
            medication = %record.name,
            phrase = %phrase,
            "Unrecognized frequency phrase, defaulting to once daily"
        );
    }
    send_notice(notifier, &record, NotifyKind::MedicationUpdated);
    Ok(slots)
}

/// Manual medication entry.
#[derive(Debug, Clone, Default)]
pub struct NewMedication {
    pub name: String,
    pub dosage: Option<Dosage>,
    pub frequency_phrase: Option<String>,
    pub instructions: Option<String>,
    /// Course length; open-ended when absent.
    pub duration_days: Option<u32>,
}

pub fn add_medication(
    conn: &Connection,
    notifier: &dyn Notifier,
    owner_id: Uuid,
    input: NewMedication,
    now: DateTime<Utc>,
) -> Result<MedicationRecord, DatabaseError> {
    let parsed = input
        .frequency_phrase
        .as_deref()
        .and_then(patterns::parse_frequency_phrase);
    let unparsed = input.frequency_phrase.is_some() && parsed.is_none();

    let record = MedicationRecord {
        id: Uuid::new_v4(),
        owner_id,
        normalized_name: normalize_name(&input.name),
        name: input.name,
        dosage: input.dosage,
        frequency_phrase: input.frequency_phrase,
        frequency: parsed,
        duration_start: input.duration_days.map(|_| now),
        duration_end: input
            .duration_days
            .map(|days| now + Duration::days(i64::from(days))),
        instructions: input.instructions,
        needs_review: unparsed,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    repository::insert_medication(conn, &record)?;
    sync_slots(conn, &record, None, now)?;
    send_notice(notifier, &record, NotifyKind::MedicationAdded);
    Ok(record)
}

/// Partial edit; unset fields keep their stored value. Frequency
/// changes go through [`set_frequency`] so slots stay in step.
#[derive(Debug, Clone, Default)]
pub struct MedicationUpdate {
    pub name: Option<String>,
    pub dosage: Option<Dosage>,
    pub instructions: Option<String>,
}

pub fn update_medication(
    conn: &Connection,
    notifier: &dyn Notifier,
    medication_id: &Uuid,
    update: MedicationUpdate,
    now: DateTime<Utc>,
) -> Result<MedicationRecord, DatabaseError> {
    let mut record = repository::get_medication(conn, medication_id)?;
    if let Some(name) = update.name {
        record.normalized_name = normalize_name(&name);
        record.name = name;
    }
    if let Some(dosage) = update.dosage {
        record.dosage = Some(dosage);
    }
    if let Some(instructions) = update.instructions {
        record.instructions = Some(instructions);
    }
    record.updated_at = now;
    repository::upsert_medication(conn, &record)?;
    send_notice(notifier, &record, NotifyKind::MedicationUpdated);
    Ok(record)
}

/// Logical delete: the record and its slots go inactive together, the
/// delivery log stays.
pub fn delete_medication(
    conn: &Connection,
    notifier: &dyn Notifier,
    medication_id: &Uuid,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let record = repository::get_medication(conn, medication_id)?;

    let tx = conn.unchecked_transaction()?;
    repository::deactivate_medication(&tx, medication_id, now)?;
    repository::deactivate_slots_for_medication(&tx, medication_id)?;
    tx.commit()?;

    info!(medication = %record.name, "Medication deactivated");
    send_notice(notifier, &record, NotifyKind::MedicationDeleted);
    Ok(())
}

pub fn list_medications(
    conn: &Connection,
    owner_id: &Uuid,
) -> Result<Vec<MedicationRecord>, DatabaseError> {
    repository::list_active_medications(conn, owner_id)
}

/// Move one dose to a different time of day. The next firing follows
/// the new time.
pub fn update_slot_time(
    conn: &Connection,
    notifier: &dyn Notifier,
    slot_id: &Uuid,
    time_of_day: NaiveTime,
    now: DateTime<Utc>,
) -> Result<ReminderSlot, DatabaseError> {
    let slot = repository::get_slot(conn, slot_id)?;
    repository::update_slot_time(conn, slot_id, time_of_day, initial_next_due(time_of_day, now))?;
    let updated = repository::get_slot(conn, slot_id)?;

    let medication = repository::get_medication(conn, &slot.medication_id)?;
    send_notice(notifier, &medication, NotifyKind::MedicationUpdated);
    Ok(updated)
}

/// Bring a record's slots in line with its effective frequency.
///
/// `previous` is the effective frequency before this write (`None` for
/// a brand-new record). An unchanged cadence keeps its slots, so custom
/// dose times and firing state survive a re-upload of the same
/// prescription.
fn sync_slots(
    conn: &Connection,
    record: &MedicationRecord,
    previous: Option<Option<CanonicalFrequency>>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let effective = record.effective_frequency();
    let desired: Vec<NaiveTime> = effective
        .map(|freq| translate(freq, None))
        .unwrap_or_default();

    if previous == Some(effective) {
        let current = repository::list_medication_slots(conn, &record.id)?;
        if current.len() == desired.len() {
            return Ok(());
        }
    }

    let slots = build_slots(record, &desired, now);
    repository::replace_active_slots(conn, &record.id, &slots)?;
    Ok(())
}

fn build_slots(
    record: &MedicationRecord,
    times: &[NaiveTime],
    now: DateTime<Utc>,
) -> Vec<ReminderSlot> {
    times
        .iter()
        .map(|&time_of_day| ReminderSlot {
            id: Uuid::new_v4(),
            medication_id: record.id,
            owner_id: record.owner_id,
            time_of_day,
            is_active: true,
            last_fired_at: None,
            last_acknowledged_at: None,
            next_due_at: initial_next_due(time_of_day, now),
            created_at: now,
        })
        .collect()
}

fn send_notice(notifier: &dyn Notifier, record: &MedicationRecord, kind: NotifyKind) {
    let message = match kind {
        NotifyKind::MedicationAdded => format!("{} added to your medications", record.name),
        NotifyKind::MedicationDeleted => format!("{} removed from your medications", record.name),
        _ => format!("{} updated", record.name),
    };
    let event = NotifyEvent {
        kind,
        medication_id: record.id,
        medication_name: record.name.clone(),
        message,
    };
    if let Err(e) = notifier.notify(record.owner_id, event) {
        warn!(medication = %record.name, error = %e, "Notification failed");
    }
}
