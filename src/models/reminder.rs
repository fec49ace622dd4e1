//! Reminder slots and the append-only delivery log.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of one due window. Every slot repeats on a 24h cycle.
pub const DUE_WINDOW_HOURS: i64 = 24;

// ═══════════════════════════════════════════
// Reminder slot
// ═══════════════════════════════════════════

/// One fixed daily dose time for a medication.
///
/// A twice-daily medication owns two slots. `next_due_at` and
/// `last_fired_at` are written only by the scheduler thread once the
/// slot exists; API mutations touch `is_active`, `time_of_day` and
/// `last_acknowledged_at` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderSlot {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub owner_id: Uuid,
    pub time_of_day: NaiveTime,
    pub is_active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_acknowledged_at: Option<DateTime<Utc>>,
    pub next_due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ReminderSlot {
    /// Start of the due window `next_due_at` closes.
    ///
    /// A firing recorded inside `[window_start, next_due_at)` means this
    /// window is spent; the at-most-once guard checks exactly that range.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.next_due_at - Duration::hours(DUE_WINDOW_HOURS)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_due_at <= now
    }
}

/// First due timestamp for a new slot: today at `time_of_day` if still
/// ahead, otherwise tomorrow.
pub fn initial_next_due(time_of_day: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time_of_day).and_utc();
    if today > now {
        today
    } else {
        today + Duration::hours(DUE_WINDOW_HOURS)
    }
}

// ═══════════════════════════════════════════
// Delivery events
// ═══════════════════════════════════════════

/// Outcome of handing a due reminder to the notify sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only record of one firing.
///
/// Written once per slot per due window. `acknowledged_at` is the only
/// field ever updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: Uuid,
    pub reminder_id: Uuid,
    pub medication_id: Uuid,
    pub owner_id: Uuid,
    pub fired_at: DateTime<Utc>,
    /// False when the notify sink was unreachable; the firing is still
    /// on record so a missed delivery is never silently dropped.
    pub delivered: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// How a delivery event counts for compliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseOutcome {
    /// Acknowledged before the window closed.
    Taken,
    /// Window closed (or a newer firing exists) with no acknowledgment.
    Missed,
    /// Window still open, no acknowledgment yet.
    Pending,
}

impl DeliveryEvent {
    /// Classify this event. `superseded` is true when a later event
    /// exists for the same slot.
    pub fn outcome(&self, now: DateTime<Utc>, superseded: bool) -> DoseOutcome {
        if self.acknowledged_at.is_some() {
            return DoseOutcome::Taken;
        }
        if superseded || self.fired_at + Duration::hours(DUE_WINDOW_HOURS) <= now {
            return DoseOutcome::Missed;
        }
        DoseOutcome::Pending
    }
}
