//! Background reminder loop.
//!
//! Polls every 30 seconds: deactivates medications whose course has
//! ended, snapshots the due slots, and fires each at most once per 24h
//! window. The loop thread is the only writer of `next_due_at` and
//! `last_fired_at`, so slot firings never race. `tick` is public and
//! takes `now` explicitly so every transition is unit-testable without
//! a running thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatch::dispatch;
use crate::db::{open_database, repository, DatabaseError};
use crate::models::{DeliveryEvent, ReminderSlot, DUE_WINDOW_HOURS};
use crate::notify::Notifier;

/// Poll interval: every 30 seconds.
pub const POLL_INTERVAL_SECS: u64 = 30;

/// Sleep granularity for shutdown responsiveness (1 second).
const SLEEP_GRANULARITY_SECS: u64 = 1;

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Medications deactivated because their course ended.
    pub expired: usize,
    /// Firings recorded, delivered or not.
    pub fired: usize,
    /// Firings whose notification reached the sink.
    pub delivered: usize,
    /// Due slots whose window already held a firing.
    pub skipped: usize,
    /// Slots whose handling failed; they stay due and retry next tick.
    pub errors: usize,
}

/// Run one scheduler pass against `conn`.
///
/// Slot failures are isolated: one bad slot is counted in `errors` and
/// the rest of the snapshot still fires.
pub fn tick(
    conn: &Connection,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<TickSummary, DatabaseError> {
    let mut summary = TickSummary::default();

    // Courses that ran out stop reminding before any slot can fire.
    let tx = conn.unchecked_transaction()?;
    let expired = repository::expire_ended_medications(&tx, now)?;
    for medication_id in &expired {
        repository::deactivate_slots_for_medication(&tx, medication_id)?;
    }
    tx.commit()?;
    summary.expired = expired.len();
    if !expired.is_empty() {
        info!(count = expired.len(), "Medication courses ended, reminders stopped");
    }

    for slot in repository::list_due_slots(conn, now)? {
        match fire_slot(conn, notifier, &slot, now) {
            Ok(SlotOutcome::Fired { delivered }) => {
                summary.fired += 1;
                if delivered {
                    summary.delivered += 1;
                }
            }
            Ok(SlotOutcome::WindowSpent) => summary.skipped += 1,
            Err(e) => {
                warn!(reminder_id = %slot.id, error = %e, "Reminder firing failed, will retry next tick");
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

enum SlotOutcome {
    Fired { delivered: bool },
    WindowSpent,
}

fn fire_slot(
    conn: &Connection,
    notifier: &dyn Notifier,
    slot: &ReminderSlot,
    now: DateTime<Utc>,
) -> Result<SlotOutcome, DatabaseError> {
    let next_due = advance_due(slot.next_due_at, now);

    // At-most-once: a firing already on record inside this window means
    // the reminder went out (possibly before a restart). Consume the
    // window without a second notification.
    if repository::window_has_event(conn, &slot.id, slot.window_start())? {
        repository::advance_slot(conn, &slot.id, next_due)?;
        debug!(reminder_id = %slot.id, "Window already served, advancing");
        return Ok(SlotOutcome::WindowSpent);
    }

    let medication = repository::get_medication(conn, &slot.medication_id)?;
    let status = dispatch(slot, &medication, notifier, now);

    let event = DeliveryEvent {
        id: Uuid::new_v4(),
        reminder_id: slot.id,
        medication_id: slot.medication_id,
        owner_id: slot.owner_id,
        fired_at: now,
        delivered: status.is_delivered(),
        acknowledged_at: None,
    };

    // Event and due-time advance land together or not at all, so a
    // crash can never leave a spent window without its firing record.
    let tx = conn.unchecked_transaction()?;
    repository::append_delivery_event(&tx, &event)?;
    repository::mark_slot_fired(&tx, &slot.id, now, next_due)?;
    tx.commit()?;

    Ok(SlotOutcome::Fired {
        delivered: status.is_delivered(),
    })
}

/// Due time after serving the current window: one full window ahead,
/// stepping extra windows when downtime left the slot more than a day
/// behind. Downtime therefore collapses into a single firing instead
/// of a backlog.
fn advance_due(next_due_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let window = Duration::hours(DUE_WINDOW_HOURS);
    let mut due = next_due_at + window;
    while due <= now {
        due += window;
    }
    due
}

// ═══════════════════════════════════════════
// Background thread
// ═══════════════════════════════════════════

/// Handle for the scheduler thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on
/// `Drop`. Keep it alive for as long as reminders should fire.
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Request graceful shutdown. A tick in progress completes; no
    /// further ticks start.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start the reminder scheduler on a background thread.
///
/// The thread opens its own connection to `db_path` and ticks
/// immediately, so reminders missed while the process was down fire on
/// startup rather than at the next wall-clock dose time.
pub fn start_scheduler(db_path: PathBuf, notifier: Arc<dyn Notifier>) -> SchedulerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        info!("Reminder scheduler started (poll every {POLL_INTERVAL_SECS}s)");
        scheduler_loop(&db_path, notifier.as_ref(), &flag);
    });

    SchedulerHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn scheduler_loop(db_path: &Path, notifier: &dyn Notifier, shutdown: &AtomicBool) {
    let conn = match open_database(db_path) {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "Scheduler could not open database, reminders disabled");
            return;
        }
    };

    while !shutdown.load(Ordering::Relaxed) {
        match tick(&conn, notifier, Utc::now()) {
            Ok(summary) if summary.fired > 0 || summary.expired > 0 || summary.errors > 0 => {
                info!(
                    fired = summary.fired,
                    delivered = summary.delivered,
                    skipped = summary.skipped,
                    expired = summary.expired,
                    errors = summary.errors,
                    "Reminder tick"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Reminder tick failed"),
        }

        // Sleep in small increments for responsive shutdown
        for _ in 0..(POLL_INTERVAL_SECS / SLEEP_GRANULARITY_SECS) {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_secs(SLEEP_GRANULARITY_SECS));
        }
    }
    info!("Reminder scheduler shutting down");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{NaiveTime, TimeZone};

    use super::*;
    use crate::db::open_memory_database;
    use crate::models::{CanonicalFrequency, Dosage, DoseUnit, MedicationRecord};
    use crate::notify::{NoopNotifier, NotifyError, NotifyEvent};

    fn test_db() -> Connection {
        open_memory_database().unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    struct RecordingNotifier {
        events: Mutex<Vec<NotifyEvent>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, _owner_id: Uuid, event: NotifyEvent) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _owner_id: Uuid, _event: NotifyEvent) -> Result<(), NotifyError> {
            Err(NotifyError::SinkUnavailable("sink down".to_string()))
        }
    }

    fn insert_medication(
        conn: &Connection,
        name: &str,
        duration_end: Option<DateTime<Utc>>,
    ) -> MedicationRecord {
        let now = at(2026, 3, 1, 12, 0);
        let record = MedicationRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: name.to_string(),
            normalized_name: crate::models::normalize_name(name),
            dosage: Some(Dosage::new(500.0, DoseUnit::Mg)),
            frequency_phrase: Some("once daily".to_string()),
            frequency: Some(CanonicalFrequency::OnceDaily),
            duration_start: None,
            duration_end,
            instructions: None,
            needs_review: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        repository::insert_medication(conn, &record).unwrap();
        record
    }

    fn insert_slot(
        conn: &Connection,
        medication: &MedicationRecord,
        next_due_at: DateTime<Utc>,
    ) -> ReminderSlot {
        let slot = ReminderSlot {
            id: Uuid::new_v4(),
            medication_id: medication.id,
            owner_id: medication.owner_id,
            time_of_day: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            is_active: true,
            last_fired_at: None,
            last_acknowledged_at: None,
            next_due_at,
            created_at: next_due_at - Duration::hours(24),
        };
        repository::insert_slot(conn, &slot).unwrap();
        slot
    }

    #[test]
    fn due_slot_fires_and_advances() {
        let conn = test_db();
        let notifier = RecordingNotifier::new();
        let medication = insert_medication(&conn, "Metformin", None);
        let slot = insert_slot(&conn, &medication, at(2026, 3, 10, 8, 0));

        let now = at(2026, 3, 10, 8, 30);
        let summary = tick(&conn, &notifier, now).unwrap();
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(notifier.count(), 1);

        let stored = repository::get_slot(&conn, &slot.id).unwrap();
        assert_eq!(stored.next_due_at, at(2026, 3, 11, 8, 0));
        assert_eq!(stored.last_fired_at, Some(now));

        let events = repository::list_events_for_reminder(&conn, &slot.id).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].delivered);
        assert_eq!(events[0].fired_at, now);
    }

    #[test]
    fn fired_slot_is_quiet_until_next_window() {
        let conn = test_db();
        let notifier = RecordingNotifier::new();
        let medication = insert_medication(&conn, "Metformin", None);
        let slot = insert_slot(&conn, &medication, at(2026, 3, 10, 8, 0));

        let now = at(2026, 3, 10, 8, 30);
        tick(&conn, &notifier, now).unwrap();
        let second = tick(&conn, &notifier, now + Duration::minutes(1)).unwrap();

        assert_eq!(second.fired, 0);
        assert_eq!(second.skipped, 0);
        assert_eq!(notifier.count(), 1);

        let events = repository::list_events_for_reminder(&conn, &slot.id).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn future_slot_does_not_fire() {
        let conn = test_db();
        let notifier = RecordingNotifier::new();
        let medication = insert_medication(&conn, "Metformin", None);
        insert_slot(&conn, &medication, at(2026, 3, 11, 8, 0));

        let summary = tick(&conn, &notifier, at(2026, 3, 10, 8, 0)).unwrap();
        assert_eq!(summary, TickSummary::default());
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn downtime_collapses_to_single_firing() {
        let conn = test_db();
        let notifier = RecordingNotifier::new();
        let medication = insert_medication(&conn, "Metformin", None);
        let slot = insert_slot(&conn, &medication, at(2026, 3, 10, 8, 0));

        // Three days offline: one catch-up firing, then back in step.
        let now = at(2026, 3, 13, 9, 15);
        let summary = tick(&conn, &notifier, now).unwrap();
        assert_eq!(summary.fired, 1);
        assert_eq!(notifier.count(), 1);

        let stored = repository::get_slot(&conn, &slot.id).unwrap();
        assert_eq!(stored.next_due_at, at(2026, 3, 14, 8, 0));
    }

    #[test]
    fn sink_failure_still_records_firing() {
        let conn = test_db();
        let medication = insert_medication(&conn, "Metformin", None);
        let slot = insert_slot(&conn, &medication, at(2026, 3, 10, 8, 0));

        let now = at(2026, 3, 10, 8, 30);
        let summary = tick(&conn, &FailingNotifier, now).unwrap();
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.delivered, 0);

        // The firing is on record as undelivered and the window is
        // spent; a flapping sink must not cause repeat notifications.
        let events = repository::list_events_for_reminder(&conn, &slot.id).unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].delivered);

        let stored = repository::get_slot(&conn, &slot.id).unwrap();
        assert!(stored.next_due_at > now);
    }

    #[test]
    fn window_guard_skips_already_served_window() {
        let conn = test_db();
        let notifier = RecordingNotifier::new();
        let medication = insert_medication(&conn, "Metformin", None);
        let slot = insert_slot(&conn, &medication, at(2026, 3, 10, 8, 0));

        let prior = DeliveryEvent {
            id: Uuid::new_v4(),
            reminder_id: slot.id,
            medication_id: medication.id,
            owner_id: medication.owner_id,
            fired_at: at(2026, 3, 10, 7, 50),
            delivered: true,
            acknowledged_at: None,
        };
        repository::append_delivery_event(&conn, &prior).unwrap();

        let summary = tick(&conn, &notifier, at(2026, 3, 10, 8, 30)).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.fired, 0);
        assert_eq!(notifier.count(), 0);

        // The spent window still advances, otherwise the slot would be
        // skipped on every later tick.
        let stored = repository::get_slot(&conn, &slot.id).unwrap();
        assert_eq!(stored.next_due_at, at(2026, 3, 11, 8, 0));

        let events = repository::list_events_for_reminder(&conn, &slot.id).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn ended_course_stops_reminding() {
        let conn = test_db();
        let notifier = RecordingNotifier::new();
        let medication = insert_medication(&conn, "Amoxicillin", Some(at(2026, 3, 10, 0, 0)));
        let slot = insert_slot(&conn, &medication, at(2026, 3, 10, 8, 0));

        let summary = tick(&conn, &notifier, at(2026, 3, 10, 8, 30)).unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.fired, 0);
        assert_eq!(notifier.count(), 0);

        let stored = repository::get_medication(&conn, &medication.id).unwrap();
        assert!(!stored.is_active);
        let stored_slot = repository::get_slot(&conn, &slot.id).unwrap();
        assert!(!stored_slot.is_active);
    }

    #[test]
    fn slot_errors_are_isolated() {
        let conn = test_db();
        let notifier = RecordingNotifier::new();
        let good = insert_medication(&conn, "Metformin", None);
        let bad = insert_medication(&conn, "Aspirin", None);
        let good_slot = insert_slot(&conn, &good, at(2026, 3, 10, 8, 0));
        let bad_slot = insert_slot(&conn, &bad, at(2026, 3, 10, 8, 0));

        // Corrupt one row so its slot fails mid-fire.
        conn.execute(
            "UPDATE medications SET frequency = 'hourly' WHERE id = ?1",
            rusqlite::params![bad.id.to_string()],
        )
        .unwrap();

        let summary = tick(&conn, &notifier, at(2026, 3, 10, 8, 30)).unwrap();
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(notifier.count(), 1);

        let good_events = repository::list_events_for_reminder(&conn, &good_slot.id).unwrap();
        assert_eq!(good_events.len(), 1);

        // The failed slot keeps its due time and retries next tick.
        let stored = repository::get_slot(&conn, &bad_slot.id).unwrap();
        assert_eq!(stored.next_due_at, at(2026, 3, 10, 8, 0));
    }

    #[test]
    fn advance_due_steps_one_window() {
        let due = at(2026, 3, 10, 8, 0);
        assert_eq!(advance_due(due, at(2026, 3, 10, 8, 30)), at(2026, 3, 11, 8, 0));
        assert_eq!(advance_due(due, due), at(2026, 3, 11, 8, 0));
    }

    #[test]
    fn advance_due_steps_past_downtime() {
        let due = at(2026, 3, 10, 8, 0);
        assert_eq!(advance_due(due, at(2026, 3, 13, 9, 0)), at(2026, 3, 14, 8, 0));
        assert_eq!(advance_due(due, at(2026, 3, 14, 8, 0)), at(2026, 3, 15, 8, 0));
    }

    #[test]
    fn poll_interval_is_thirty_seconds() {
        assert_eq!(POLL_INTERVAL_SECS, 30);
    }

    #[test]
    fn sleep_granularity_divides_poll_interval() {
        assert_eq!(POLL_INTERVAL_SECS % SLEEP_GRANULARITY_SECS, 0);
    }

    #[test]
    fn shutdown_flag_sets_atomic() {
        let handle = SchedulerHandle {
            shutdown: Arc::new(AtomicBool::new(false)),
            handle: None,
        };
        assert!(!handle.shutdown.load(Ordering::Relaxed));
        handle.shutdown();
        assert!(handle.shutdown.load(Ordering::Relaxed));
    }

    #[test]
    fn scheduler_thread_starts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start_scheduler(dir.path().join("reminders.db"), Arc::new(NoopNotifier));
        handle.shutdown();
        drop(handle); // joins the thread
    }
}
