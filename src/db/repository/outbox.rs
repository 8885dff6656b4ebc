use std::str::FromStr;

use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::{EntityKind, OutboxOp};

/// A pending remote write. `payload` holds the serialized document for
/// upserts and is `None` for deletes.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: i64,
    pub entity_type: EntityKind,
    pub op: OutboxOp,
    pub remote_id: String,
    pub payload: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub fn enqueue_outbox(
    conn: &Connection,
    kind: EntityKind,
    op: OutboxOp,
    remote_id: &str,
    payload: Option<&str>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO outbox (entity_type, op, remote_id, payload) VALUES (?1, ?2, ?3, ?4)",
        params![kind.as_str(), op.as_str(), remote_id, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Oldest pending entries first, bounded per drain pass.
pub fn pending_outbox(conn: &Connection, limit: u32) -> Result<Vec<OutboxEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, op, remote_id, payload, attempts, last_error
         FROM outbox ORDER BY id ASC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, u32>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, entity_type, op, remote_id, payload, attempts, last_error) = row?;
        entries.push(OutboxEntry {
            id,
            entity_type: EntityKind::from_str(&entity_type)?,
            op: OutboxOp::from_str(&op)?,
            remote_id,
            payload,
            attempts,
            last_error,
        });
    }
    Ok(entries)
}

pub fn delete_outbox_entry(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
    Ok(())
}

/// Record a failed delivery attempt.
pub fn mark_outbox_failure(
    conn: &Connection,
    id: i64,
    error: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE outbox SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
        params![id, error],
    )?;
    Ok(())
}

pub fn outbox_len(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
    Ok(count)
}
