use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::DeliveryEvent;

use super::{fmt_ts, parse_ts, parse_uuid};

/// Append one firing to the log. Events are never updated afterwards
/// except to stamp `acknowledged_at`.
pub fn append_delivery_event(conn: &Connection, event: &DeliveryEvent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO delivery_events (id, reminder_id, medication_id, owner_id, fired_at,
         delivered, acknowledged_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id.to_string(),
            event.reminder_id.to_string(),
            event.medication_id.to_string(),
            event.owner_id.to_string(),
            fmt_ts(event.fired_at),
            event.delivered as i32,
            event.acknowledged_at.map(fmt_ts),
        ],
    )?;
    Ok(())
}

/// Whether the slot already fired at or after `window_start`. Guards a
/// second firing in the same window after a crash between the event
/// append and the due-time advance.
pub fn window_has_event(
    conn: &Connection,
    reminder_id: &Uuid,
    window_start: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM delivery_events WHERE reminder_id = ?1 AND fired_at >= ?2",
        params![reminder_id.to_string(), fmt_ts(window_start)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// The most recent firing of this slot that was never acknowledged.
pub fn latest_unacknowledged_event(
    conn: &Connection,
    reminder_id: &Uuid,
) -> Result<Option<DeliveryEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, reminder_id, medication_id, owner_id, fired_at, delivered, acknowledged_at
         FROM delivery_events
         WHERE reminder_id = ?1 AND acknowledged_at IS NULL
         ORDER BY fired_at DESC, id LIMIT 1",
    )?;

    let mut rows = stmt.query_map(params![reminder_id.to_string()], |row| {
        Ok(event_row_from_rusqlite(row))
    })?;
    match rows.next() {
        Some(row) => Ok(Some(event_from_row(row??)?)),
        None => Ok(None),
    }
}

pub fn acknowledge_event(
    conn: &Connection,
    event_id: &Uuid,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE delivery_events SET acknowledged_at = ?2 WHERE id = ?1 AND acknowledged_at IS NULL",
        params![event_id.to_string(), fmt_ts(at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("delivery_event", event_id));
    }
    Ok(())
}

/// Full firing history of one slot, oldest first.
pub fn list_events_for_reminder(
    conn: &Connection,
    reminder_id: &Uuid,
) -> Result<Vec<DeliveryEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, reminder_id, medication_id, owner_id, fired_at, delivered, acknowledged_at
         FROM delivery_events WHERE reminder_id = ?1 ORDER BY fired_at, id",
    )?;

    let rows = stmt.query_map(params![reminder_id.to_string()], |row| {
        Ok(event_row_from_rusqlite(row))
    })?;
    collect_events(rows)
}

/// Every firing for one medication across its slots, oldest first.
pub fn list_events_for_medication(
    conn: &Connection,
    medication_id: &Uuid,
) -> Result<Vec<DeliveryEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, reminder_id, medication_id, owner_id, fired_at, delivered, acknowledged_at
         FROM delivery_events WHERE medication_id = ?1 ORDER BY fired_at, id",
    )?;

    let rows = stmt.query_map(params![medication_id.to_string()], |row| {
        Ok(event_row_from_rusqlite(row))
    })?;
    collect_events(rows)
}

/// An owner's firings inside an inclusive time range, oldest first.
/// Compliance reports read from this.
pub fn list_events_for_owner(
    conn: &Connection,
    owner_id: &Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DeliveryEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, reminder_id, medication_id, owner_id, fired_at, delivered, acknowledged_at
         FROM delivery_events
         WHERE owner_id = ?1 AND fired_at >= ?2 AND fired_at <= ?3
         ORDER BY fired_at, id",
    )?;

    let rows = stmt.query_map(
        params![owner_id.to_string(), fmt_ts(from), fmt_ts(to)],
        |row| Ok(event_row_from_rusqlite(row)),
    )?;
    collect_events(rows)
}

// Internal row type for DeliveryEvent mapping
struct EventRow {
    id: String,
    reminder_id: String,
    medication_id: String,
    owner_id: String,
    fired_at: String,
    delivered: i32,
    acknowledged_at: Option<String>,
}

fn event_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<EventRow, rusqlite::Error> {
    Ok(EventRow {
        id: row.get(0)?,
        reminder_id: row.get(1)?,
        medication_id: row.get(2)?,
        owner_id: row.get(3)?,
        fired_at: row.get(4)?,
        delivered: row.get(5)?,
        acknowledged_at: row.get(6)?,
    })
}

fn event_from_row(row: EventRow) -> Result<DeliveryEvent, DatabaseError> {
    Ok(DeliveryEvent {
        id: parse_uuid(&row.id)?,
        reminder_id: parse_uuid(&row.reminder_id)?,
        medication_id: parse_uuid(&row.medication_id)?,
        owner_id: parse_uuid(&row.owner_id)?,
        fired_at: parse_ts(&row.fired_at)?,
        delivered: row.delivered != 0,
        acknowledged_at: row.acknowledged_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn collect_events<I>(rows: I) -> Result<Vec<DeliveryEvent>, DatabaseError>
where
    I: Iterator<Item = rusqlite::Result<Result<EventRow, rusqlite::Error>>>,
{
    let mut events = Vec::new();
    for row in rows {
        events.push(event_from_row(row??)?);
    }
    Ok(events)
}
