use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::ReminderSlot;

use super::{fmt_time, fmt_ts, parse_time, parse_ts, parse_uuid};

pub fn insert_slot(conn: &Connection, slot: &ReminderSlot) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reminder_slots (id, medication_id, owner_id, time_of_day, is_active,
         last_fired_at, last_acknowledged_at, next_due_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            slot.id.to_string(),
            slot.medication_id.to_string(),
            slot.owner_id.to_string(),
            fmt_time(slot.time_of_day),
            slot.is_active as i32,
            slot.last_fired_at.map(fmt_ts),
            slot.last_acknowledged_at.map(fmt_ts),
            fmt_ts(slot.next_due_at),
            fmt_ts(slot.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_slot(conn: &Connection, id: &Uuid) -> Result<ReminderSlot, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, medication_id, owner_id, time_of_day, is_active, last_fired_at,
         last_acknowledged_at, next_due_at, created_at
         FROM reminder_slots WHERE id = ?1",
    )?;

    let mut rows = stmt.query_map(params![id.to_string()], |row| Ok(slot_row_from_rusqlite(row)))?;
    match rows.next() {
        Some(row) => slot_from_row(row??),
        None => Err(DatabaseError::not_found("reminder_slot", id)),
    }
}

/// Active slots whose due time has passed the cutoff, soonest first.
/// This is the scheduler's per-tick scan.
pub fn list_due_slots(
    conn: &Connection,
    before: DateTime<Utc>,
) -> Result<Vec<ReminderSlot>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, medication_id, owner_id, time_of_day, is_active, last_fired_at,
         last_acknowledged_at, next_due_at, created_at
         FROM reminder_slots WHERE is_active = 1 AND next_due_at <= ?1
         ORDER BY next_due_at, id",
    )?;

    let rows = stmt.query_map(params![fmt_ts(before)], |row| Ok(slot_row_from_rusqlite(row)))?;
    collect_slots(rows)
}

/// Active slots for one medication, in dose-time order.
pub fn list_medication_slots(
    conn: &Connection,
    medication_id: &Uuid,
) -> Result<Vec<ReminderSlot>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, medication_id, owner_id, time_of_day, is_active, last_fired_at,
         last_acknowledged_at, next_due_at, created_at
         FROM reminder_slots WHERE medication_id = ?1 AND is_active = 1
         ORDER BY time_of_day, id",
    )?;

    let rows = stmt.query_map(params![medication_id.to_string()], |row| {
        Ok(slot_row_from_rusqlite(row))
    })?;
    collect_slots(rows)
}

/// Every active slot an owner has, across medications.
pub fn list_owner_slots(
    conn: &Connection,
    owner_id: &Uuid,
) -> Result<Vec<ReminderSlot>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, medication_id, owner_id, time_of_day, is_active, last_fired_at,
         last_acknowledged_at, next_due_at, created_at
         FROM reminder_slots WHERE owner_id = ?1 AND is_active = 1
         ORDER BY time_of_day, id",
    )?;

    let rows = stmt.query_map(params![owner_id.to_string()], |row| {
        Ok(slot_row_from_rusqlite(row))
    })?;
    collect_slots(rows)
}

/// Swap a medication's schedule: deactivate the current slots and insert
/// the replacements, atomically. Old rows stay for delivery history.
pub fn replace_active_slots(
    conn: &Connection,
    medication_id: &Uuid,
    slots: &[ReminderSlot],
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE reminder_slots SET is_active = 0 WHERE medication_id = ?1 AND is_active = 1",
        params![medication_id.to_string()],
    )?;
    for slot in slots {
        tx.execute(
            "INSERT INTO reminder_slots (id, medication_id, owner_id, time_of_day, is_active,
             last_fired_at, last_acknowledged_at, next_due_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                slot.id.to_string(),
                slot.medication_id.to_string(),
                slot.owner_id.to_string(),
                fmt_time(slot.time_of_day),
                slot.is_active as i32,
                slot.last_fired_at.map(fmt_ts),
                slot.last_acknowledged_at.map(fmt_ts),
                fmt_ts(slot.next_due_at),
                fmt_ts(slot.created_at),
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn deactivate_slots_for_medication(
    conn: &Connection,
    medication_id: &Uuid,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE reminder_slots SET is_active = 0 WHERE medication_id = ?1",
        params![medication_id.to_string()],
    )?;
    Ok(())
}

/// Record a firing: stamp `last_fired_at` and advance the due time.
/// Only the scheduler thread calls this.
pub fn mark_slot_fired(
    conn: &Connection,
    slot_id: &Uuid,
    fired_at: DateTime<Utc>,
    next_due_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminder_slots SET last_fired_at = ?2, next_due_at = ?3 WHERE id = ?1",
        params![slot_id.to_string(), fmt_ts(fired_at), fmt_ts(next_due_at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("reminder_slot", slot_id));
    }
    Ok(())
}

/// Advance the due time without recording a firing. Used when a due
/// window turns out to be already spent.
pub fn advance_slot(
    conn: &Connection,
    slot_id: &Uuid,
    next_due_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminder_slots SET next_due_at = ?2 WHERE id = ?1",
        params![slot_id.to_string(), fmt_ts(next_due_at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("reminder_slot", slot_id));
    }
    Ok(())
}

pub fn mark_slot_acknowledged(
    conn: &Connection,
    slot_id: &Uuid,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminder_slots SET last_acknowledged_at = ?2 WHERE id = ?1",
        params![slot_id.to_string(), fmt_ts(at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("reminder_slot", slot_id));
    }
    Ok(())
}

/// Move a slot to a new time of day and reschedule its next firing.
pub fn update_slot_time(
    conn: &Connection,
    slot_id: &Uuid,
    time_of_day: NaiveTime,
    next_due_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminder_slots SET time_of_day = ?2, next_due_at = ?3 WHERE id = ?1",
        params![slot_id.to_string(), fmt_time(time_of_day), fmt_ts(next_due_at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("reminder_slot", slot_id));
    }
    Ok(())
}

// Internal row type for ReminderSlot mapping
struct SlotRow {
    id: String,
    medication_id: String,
    owner_id: String,
    time_of_day: String,
    is_active: i32,
    last_fired_at: Option<String>,
    last_acknowledged_at: Option<String>,
    next_due_at: String,
    created_at: String,
}

fn slot_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<SlotRow, rusqlite::Error> {
    Ok(SlotRow {
        id: row.get(0)?,
        medication_id: row.get(1)?,
        owner_id: row.get(2)?,
        time_of_day: row.get(3)?,
        is_active: row.get(4)?,
        last_fired_at: row.get(5)?,
        last_acknowledged_at: row.get(6)?,
        next_due_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn slot_from_row(row: SlotRow) -> Result<ReminderSlot, DatabaseError> {
    Ok(ReminderSlot {
        id: parse_uuid(&row.id)?,
        medication_id: parse_uuid(&row.medication_id)?,
        owner_id: parse_uuid(&row.owner_id)?,
        time_of_day: parse_time(&row.time_of_day)?,
        is_active: row.is_active != 0,
        last_fired_at: row.last_fired_at.as_deref().map(parse_ts).transpose()?,
        last_acknowledged_at: row
            .last_acknowledged_at
            .as_deref()
            .map(parse_ts)
            .transpose()?,
        next_due_at: parse_ts(&row.next_due_at)?,
        created_at: parse_ts(&row.created_at)?,
    })
}

fn collect_slots<I>(rows: I) -> Result<Vec<ReminderSlot>, DatabaseError>
where
    I: Iterator<Item = rusqlite::Result<Result<SlotRow, rusqlite::Error>>>,
{
    let mut slots = Vec::new();
    for row in rows {
        slots.push(slot_from_row(row??)?);
    }
    Ok(slots)
}
