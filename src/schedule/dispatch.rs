//! Hand a due reminder to the notify sink.
//!
//! Dispatch never fails upward: a sink error becomes a `Failed` status
//! and the scheduler records the firing either way, so the due window
//! is spent exactly once whether or not the notification landed.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::models::{DeliveryStatus, MedicationRecord, ReminderSlot};
use crate::notify::{Notifier, NotifyEvent, NotifyKind};

/// Display line for a due reminder, e.g. "Time to take Metformin 500mg".
pub fn reminder_message(medication: &MedicationRecord) -> String {
    match medication.dosage_label() {
        Some(dose) => format!("Time to take {} {dose}", medication.name),
        None => format!("Time to take {}", medication.name),
    }
}

/// Send one due-reminder notification.
pub fn dispatch(
    slot: &ReminderSlot,
    medication: &MedicationRecord,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> DeliveryStatus {
    let event = NotifyEvent {
        kind: NotifyKind::ReminderDue,
        medication_id: medication.id,
        medication_name: medication.name.clone(),
        message: reminder_message(medication),
    };

    match notifier.notify(slot.owner_id, event) {
        Ok(()) => {
            info!(
                reminder_id = %slot.id,
                medication = %medication.name,
                minutes_late = (now - slot.next_due_at).num_minutes(),
                "Reminder delivered"
            );
            DeliveryStatus::Delivered
        }
        Err(e) => {
            warn!(
                reminder_id = %slot.id,
                medication = %medication.name,
                error = %e,
                "Notify sink failed, recording undelivered firing"
            );
            DeliveryStatus::Failed
        }
    }
}
