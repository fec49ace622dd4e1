use rusqlite::{params, Connection};
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::db::DatabaseError;
use crate::models::{CanonicalFrequency, Dosage, DoseUnit, MedicationRecord};

use super::{fmt_ts, parse_ts, parse_uuid};

pub fn insert_medication(conn: &Connection, med: &MedicationRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, owner_id, name, normalized_name, dosage_value, dosage_unit,
         frequency_phrase, frequency, duration_start, duration_end, instructions, needs_review,
         is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            med.id.to_string(),
            med.owner_id.to_string(),
            med.name,
            med.normalized_name,
            med.dosage.map(|d| d.value),
            med.dosage.map(|d| d.unit.as_str()),
            med.frequency_phrase,
            med.frequency.map(|f| f.token()),
            med.duration_start.map(fmt_ts),
            med.duration_end.map(fmt_ts),
            med.instructions,
            med.needs_review as i32,
            med.is_active as i32,
            fmt_ts(med.created_at),
            fmt_ts(med.updated_at),
        ],
    )?;
    Ok(())
}

/// Insert, or update every mutable column when the id already exists.
/// Plain `OR REPLACE` would delete and re-insert the row, breaking the
/// foreign keys from reminder slots and delivery events.
pub fn upsert_medication(conn: &Connection, med: &MedicationRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, owner_id, name, normalized_name, dosage_value, dosage_unit,
         frequency_phrase, frequency, duration_start, duration_end, instructions, needs_review,
         is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             normalized_name = excluded.normalized_name,
             dosage_value = excluded.dosage_value,
             dosage_unit = excluded.dosage_unit,
             frequency_phrase = excluded.frequency_phrase,
             frequency = excluded.frequency,
             duration_start = excluded.duration_start,
             duration_end = excluded.duration_end,
             instructions = excluded.instructions,
             needs_review = excluded.needs_review,
             is_active = excluded.is_active,
             updated_at = excluded.updated_at",
        params![
            med.id.to_string(),
            med.owner_id.to_string(),
            med.name,
            med.normalized_name,
            med.dosage.map(|d| d.value),
            med.dosage.map(|d| d.unit.as_str()),
            med.frequency_phrase,
            med.frequency.map(|f| f.token()),
            med.duration_start.map(fmt_ts),
            med.duration_end.map(fmt_ts),
            med.instructions,
            med.needs_review as i32,
            med.is_active as i32,
            fmt_ts(med.created_at),
            fmt_ts(med.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_medication(conn: &Connection, id: &Uuid) -> Result<MedicationRecord, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, normalized_name, dosage_value, dosage_unit, frequency_phrase,
         frequency, duration_start, duration_end, instructions, needs_review, is_active,
         created_at, updated_at
         FROM medications WHERE id = ?1",
    )?;

    let mut rows = stmt.query_map(params![id.to_string()], |row| {
        Ok(medication_row_from_rusqlite(row))
    })?;

    match rows.next() {
        Some(row) => medication_from_row(row??),
        None => Err(DatabaseError::not_found("medication", id)),
    }
}

/// All records for an owner, active and inactive, newest first.
pub fn list_medications(
    conn: &Connection,
    owner_id: &Uuid,
) -> Result<Vec<MedicationRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, normalized_name, dosage_value, dosage_unit, frequency_phrase,
         frequency, duration_start, duration_end, instructions, needs_review, is_active,
         created_at, updated_at
         FROM medications WHERE owner_id = ?1 ORDER BY created_at DESC, id",
    )?;

    let rows = stmt.query_map(params![owner_id.to_string()], |row| {
        Ok(medication_row_from_rusqlite(row))
    })?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row??)?);
    }
    Ok(meds)
}

pub fn list_active_medications(
    conn: &Connection,
    owner_id: &Uuid,
) -> Result<Vec<MedicationRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, normalized_name, dosage_value, dosage_unit, frequency_phrase,
         frequency, duration_start, duration_end, instructions, needs_review, is_active,
         created_at, updated_at
         FROM medications WHERE owner_id = ?1 AND is_active = 1 ORDER BY created_at DESC, id",
    )?;

    let rows = stmt.query_map(params![owner_id.to_string()], |row| {
        Ok(medication_row_from_rusqlite(row))
    })?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row??)?);
    }
    Ok(meds)
}

/// Deactivate active medications whose course ended before `now`.
/// Returns the affected ids so the caller can retire their slots too.
pub fn expire_ended_medications(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, DatabaseError> {
    let cutoff = fmt_ts(now);
    let mut stmt = conn.prepare(
        "SELECT id FROM medications
         WHERE is_active = 1 AND duration_end IS NOT NULL AND duration_end < ?1",
    )?;
    let ids: Vec<String> = stmt
        .query_map(params![cutoff], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    let mut expired = Vec::with_capacity(ids.len());
    for id in ids {
        conn.execute(
            "UPDATE medications SET is_active = 0, updated_at = ?2 WHERE id = ?1",
            params![id, cutoff],
        )?;
        expired.push(parse_uuid(&id)?);
    }
    Ok(expired)
}

/// Logical delete. The row stays for compliance history.
pub fn deactivate_medication(
    conn: &Connection,
    id: &Uuid,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET is_active = 0, updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), fmt_ts(now)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("medication", id));
    }
    Ok(())
}

// Internal row type for MedicationRecord mapping
struct MedicationRow {
    id: String,
    owner_id: String,
    name: String,
    normalized_name: String,
    dosage_value: Option<f64>,
    dosage_unit: Option<String>,
    frequency_phrase: Option<String>,
    frequency: Option<String>,
    duration_start: Option<String>,
    duration_end: Option<String>,
    instructions: Option<String>,
    needs_review: i32,
    is_active: i32,
    created_at: String,
    updated_at: String,
}

fn medication_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<MedicationRow, rusqlite::Error> {
    Ok(MedicationRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        normalized_name: row.get(3)?,
        dosage_value: row.get(4)?,
        dosage_unit: row.get(5)?,
        frequency_phrase: row.get(6)?,
        frequency: row.get(7)?,
        duration_start: row.get(8)?,
        duration_end: row.get(9)?,
        instructions: row.get(10)?,
        needs_review: row.get(11)?,
        is_active: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn medication_from_row(row: MedicationRow) -> Result<MedicationRecord, DatabaseError> {
    let dosage = match (row.dosage_value, row.dosage_unit) {
        (Some(value), Some(unit)) => {
            let unit = DoseUnit::from_str(&unit).ok_or_else(|| DatabaseError::InvalidEnum {
                field: "dosage_unit".to_string(),
                value: unit,
            })?;
            Some(Dosage::new(value, unit))
        }
        _ => None,
    };

    let frequency = match row.frequency {
        Some(token) => Some(CanonicalFrequency::from_token(&token).ok_or_else(|| {
            DatabaseError::InvalidEnum {
                field: "frequency".to_string(),
                value: token,
            }
        })?),
        None => None,
    };

    Ok(MedicationRecord {
        id: parse_uuid(&row.id)?,
        owner_id: parse_uuid(&row.owner_id)?,
        name: row.name,
        normalized_name: row.normalized_name,
        dosage,
        frequency_phrase: row.frequency_phrase,
        frequency,
        duration_start: row.duration_start.as_deref().map(parse_ts).transpose()?,
        duration_end: row.duration_end.as_deref().map(parse_ts).transpose()?,
        instructions: row.instructions,
        needs_review: row.needs_review != 0,
        is_active: row.is_active != 0,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}
