//! Dose acknowledgment and compliance reporting.
//!
//! Compliance compares what the schedule called for against the
//! delivery log: expected doses come from slot cadence intersected with
//! the medication's active window, taken doses from acknowledged
//! events. Windows the scheduler never served still count as expected,
//! so downtime surfaces as missed doses instead of vanishing.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{repository, DatabaseError};
use crate::models::{DeliveryEvent, DoseOutcome, MedicationRecord};
use crate::notify::{Notifier, NotifyEvent, NotifyKind};
use crate::schedule::translate::translate;

/// Mark the owner's response to a reminder: stamp the window's event
/// and the slot together, then confirm through the sink.
///
/// Fails with `NotFound` when the slot has no open firing, including a
/// second acknowledgment of an already-answered window.
pub fn acknowledge_dose(
    conn: &Connection,
    notifier: &dyn Notifier,
    reminder_id: &Uuid,
    at: DateTime<Utc>,
) -> Result<DeliveryEvent, DatabaseError> {
    let event = repository::latest_unacknowledged_event(conn, reminder_id)?
        .ok_or_else(|| DatabaseError::not_found("unacknowledged delivery event", reminder_id))?;

    let tx = conn.unchecked_transaction()?;
    repository::acknowledge_event(&tx, &event.id, at)?;
    repository::mark_slot_acknowledged(&tx, reminder_id, at)?;
    tx.commit()?;

    let medication = repository::get_medication(conn, &event.medication_id)?;
    info!(medication = %medication.name, "Dose acknowledged");

    let notice = NotifyEvent {
        kind: NotifyKind::DoseTaken,
        medication_id: medication.id,
        medication_name: medication.name.clone(),
        message: format!("{} marked as taken", medication.name),
    };
    if let Err(e) = notifier.notify(medication.owner_id, notice) {
        warn!(medication = %medication.name, error = %e, "Notification failed");
    }

    Ok(DeliveryEvent {
        acknowledged_at: Some(at),
        ..event
    })
}

/// One logged firing with its compliance classification.
#[derive(Debug, Clone, Serialize)]
pub struct DoseHistoryEntry {
    pub event: DeliveryEvent,
    pub outcome: DoseOutcome,
}

/// Full firing history of one medication, oldest first.
pub fn dose_history(
    conn: &Connection,
    medication_id: &Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<DoseHistoryEntry>, DatabaseError> {
    let events = repository::list_events_for_medication(conn, medication_id)?;
    let entries = events
        .iter()
        .map(|event| DoseHistoryEntry {
            outcome: event.outcome(now, superseded_within(&events, event)),
            event: event.clone(),
        })
        .collect();
    Ok(entries)
}

/// Compliance numbers for one medication over a report range.
#[derive(Debug, Clone, Serialize)]
pub struct MedicationCompliance {
    pub medication_id: Uuid,
    pub name: String,
    /// Doses the schedule called for inside the range.
    pub expected: usize,
    pub taken: usize,
    pub missed: usize,
    /// Fired, window still open, not yet acknowledged.
    pub pending: usize,
    /// `taken / expected`, absent when nothing was expected.
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub per_medication: Vec<MedicationCompliance>,
    /// Owner-wide `taken / expected` across the medications that
    /// expected at least one dose.
    pub overall_rate: Option<f64>,
}

/// Compliance over `[from, to]` for every record the owner has,
/// inactive ones included so finished courses keep their history.
pub fn compliance_report(
    conn: &Connection,
    owner_id: &Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ComplianceReport, DatabaseError> {
    let medications = repository::list_medications(conn, owner_id)?;

    let mut by_medication: HashMap<Uuid, Vec<DeliveryEvent>> = HashMap::new();
    for event in repository::list_events_for_owner(conn, owner_id, from, to)? {
        by_medication.entry(event.medication_id).or_default().push(event);
    }

    let none: Vec<DeliveryEvent> = Vec::new();
    let mut per_medication = Vec::with_capacity(medications.len());
    for medication in &medications {
        let times = dose_times(conn, medication)?;
        let events = by_medication.get(&medication.id).unwrap_or(&none);
        per_medication.push(medication_compliance(medication, &times, events, from, to, now));
    }

    let mut total_expected = 0;
    let mut total_taken = 0;
    for entry in &per_medication {
        if entry.expected > 0 {
            total_expected += entry.expected;
            total_taken += entry.taken;
        }
    }

    Ok(ComplianceReport {
        overall_rate: rate(total_taken, total_expected),
        per_medication,
    })
}

/// Dose times driving expected counts: the live slots while the record
/// has them, otherwise the cadence its frequency implies. Expired and
/// deleted medications keep their history through the fallback.
fn dose_times(
    conn: &Connection,
    medication: &MedicationRecord,
) -> Result<Vec<NaiveTime>, DatabaseError> {
    let slots = repository::list_medication_slots(conn, &medication.id)?;
    if !slots.is_empty() {
        return Ok(slots.iter().map(|slot| slot.time_of_day).collect());
    }
    Ok(medication
        .effective_frequency()
        .map(|freq| translate(freq, None))
        .unwrap_or_default())
}

/// Pure compliance math for one medication.
///
/// `events` must already be limited to the report range. Missed counts
/// derive from the expected total rather than the event log, so windows
/// the scheduler never served still register.
fn medication_compliance(
    medication: &MedicationRecord,
    times: &[NaiveTime],
    events: &[DeliveryEvent],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MedicationCompliance {
    let start = medication
        .duration_start
        .unwrap_or(medication.created_at)
        .max(from);
    let mut end = to.min(now);
    if let Some(course_end) = medication.duration_end {
        end = end.min(course_end);
    }
    if !medication.is_active {
        // updated_at is the deactivation stamp on inactive records.
        end = end.min(medication.updated_at);
    }

    let expected = expected_doses(times, start, end);

    let mut taken = 0;
    let mut pending = 0;
    for event in events {
        match event.outcome(now, superseded_within(events, event)) {
            DoseOutcome::Taken => taken += 1,
            DoseOutcome::Pending => pending += 1,
            DoseOutcome::Missed => {}
        }
    }

    MedicationCompliance {
        medication_id: medication.id,
        name: medication.name.clone(),
        expected,
        taken,
        missed: expected.saturating_sub(taken + pending),
        pending,
        rate: rate(taken, expected),
    }
}

/// Whether a later firing of the same slot exists in `events`.
fn superseded_within(events: &[DeliveryEvent], event: &DeliveryEvent) -> bool {
    events
        .iter()
        .any(|later| later.reminder_id == event.reminder_id && later.fired_at > event.fired_at)
}

/// Count scheduled dose instants inside `[start, end]`, day by day.
fn expected_doses(times: &[NaiveTime], start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
    if times.is_empty() || end < start {
        return 0;
    }
    let mut count = 0;
    let mut day = start.date_naive();
    let last = end.date_naive();
    while day <= last {
        for &time_of_day in times {
            let instant = day.and_time(time_of_day).and_utc();
            if instant >= start && instant <= end {
                count += 1;
            }
        }
        let Some(next) = day.succ_opt() else { break };
        day = next;
    }
    count
}

/// `taken / expected`, capped at 1.0. `None` when nothing was expected.
fn rate(taken: usize, expected: usize) -> Option<f64> {
    if expected == 0 {
        return None;
    }
    Some((taken as f64 / expected as f64).min(1.0))
}
