use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use crate::db::DatabaseError;

const FIRE_AT_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// A durable one-shot reminder registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub dose_id: i64,
    pub treatment_id: i64,
    pub fire_at: NaiveDateTime,
}

pub fn upsert_reminder(
    conn: &Connection,
    dose_id: i64,
    treatment_id: i64,
    fire_at: NaiveDateTime,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reminder_schedule (dose_id, treatment_id, fire_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (dose_id) DO UPDATE SET fire_at = excluded.fire_at",
        params![dose_id, treatment_id, fire_at.format(FIRE_AT_FMT).to_string()],
    )?;
    Ok(())
}

pub fn delete_reminder(conn: &Connection, dose_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM reminder_schedule WHERE dose_id = ?1",
        params![dose_id],
    )?;
    Ok(())
}

/// Dose ids registered for a treatment (edit/delete cancels all of them).
pub fn reminders_for_treatment(
    conn: &Connection,
    treatment_id: i64,
) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT dose_id FROM reminder_schedule WHERE treatment_id = ?1")?;
    let rows = stmt.query_map(params![treatment_id], |row| row.get(0))?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn all_reminders(conn: &Connection) -> Result<Vec<ScheduledReminder>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT dose_id, treatment_id, fire_at FROM reminder_schedule ORDER BY fire_at ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut reminders = Vec::new();
    for row in rows {
        let (dose_id, treatment_id, raw) = row?;
        let fire_at = NaiveDateTime::parse_from_str(&raw, FIRE_AT_FMT).map_err(|e| {
            DatabaseError::ConstraintViolation(format!("bad fire_at {raw:?}: {e}"))
        })?;
        reminders.push(ScheduledReminder {
            dose_id,
            treatment_id,
            fire_at,
        });
    }
    Ok(reminders)
}

/// Drop rows already in the past; the timers they describe can never fire.
pub fn prune_reminders_before(
    conn: &Connection,
    cutoff: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let pruned = conn.execute(
        "DELETE FROM reminder_schedule WHERE fire_at < ?1",
        params![cutoff.format(FIRE_AT_FMT).to_string()],
    )?;
    Ok(pruned)
}
