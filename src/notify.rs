//! Notification sink boundary.
//!
//! The core emits events through the `Notifier` trait and never owns a
//! transport; the embedding application decides whether events become
//! OS notifications, UI toasts, or log lines. `NoopNotifier` backs
//! tests and headless runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What happened, from the owner's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    ReminderDue,
    MedicationAdded,
    MedicationUpdated,
    MedicationDeleted,
    DoseTaken,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReminderDue => "reminder_due",
            Self::MedicationAdded => "medication_added",
            Self::MedicationUpdated => "medication_updated",
            Self::MedicationDeleted => "medication_deleted",
            Self::DoseTaken => "dose_taken",
        }
    }
}

impl std::fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub kind: NotifyKind,
    pub medication_id: Uuid,
    /// Display name of the medication ("Metformin").
    pub medication_name: String,
    /// Human-readable line for direct display, e.g.
    /// "Time to take Metformin 500mg".
    pub message: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivery boundary the core calls into. Implementations must not
/// block for long: the scheduler loop dispatches inline and a slow sink
/// delays every later slot in the tick.
pub trait Notifier: Send + Sync {
    fn notify(&self, owner_id: Uuid, event: NotifyEvent) -> Result<(), NotifyError>;
}

/// Discards every event. Used in tests and when no frontend is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _owner_id: Uuid, _event: NotifyEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify the trait is object-safe (can be used as `dyn Notifier`)
    #[test]
    fn notifier_is_object_safe() {
        fn _assert(_: &dyn Notifier) {}
    }

    #[test]
    fn noop_accepts_events() {
        let event = NotifyEvent {
            kind: NotifyKind::ReminderDue,
            medication_id: Uuid::new_v4(),
            medication_name: "Metformin".to_string(),
            message: "Time to take Metformin 500mg".to_string(),
        };
        assert!(NoopNotifier.notify(Uuid::new_v4(), event).is_ok());
    }

    #[test]
    fn kind_tokens_are_snake_case() {
        assert_eq!(NotifyKind::ReminderDue.as_str(), "reminder_due");
        assert_eq!(NotifyKind::DoseTaken.as_str(), "dose_taken");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotifyKind::ReminderDue).unwrap();
        assert_eq!(json, "\"reminder_due\"");
        let json = serde_json::to_string(&NotifyKind::MedicationDeleted).unwrap();
        assert_eq!(json, "\"medication_deleted\"");
    }

    // Sinks forward events as JSON; the field names are their contract.
    #[test]
    fn event_serializes_for_sinks() {
        let event = NotifyEvent {
            kind: NotifyKind::ReminderDue,
            medication_id: Uuid::nil(),
            medication_name: "Metformin".to_string(),
            message: "Time to take Metformin 500mg".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"reminder_due\""));
        assert!(json.contains("\"medication_name\":\"Metformin\""));
        assert!(json.contains("Time to take Metformin 500mg"));
    }
}
