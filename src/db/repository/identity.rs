use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::EntityKind;

/// A local row's remote document identity. `key_version` counts how many
/// times the remote id has been rotated after a keyed field changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub entity_type: EntityKind,
    pub local_id: i64,
    pub remote_id: String,
    pub key_version: u32,
}

/// Record the remote id for a local row (first mirror write).
pub fn record_identity(
    conn: &Connection,
    kind: EntityKind,
    local_id: i64,
    remote_id: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO remote_identity (entity_type, local_id, remote_id, key_version)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT (entity_type, local_id)
         DO UPDATE SET remote_id = excluded.remote_id",
        params![kind.as_str(), local_id, remote_id],
    )?;
    Ok(())
}

pub fn get_identity(
    conn: &Connection,
    kind: EntityKind,
    local_id: i64,
) -> Result<Option<RemoteIdentity>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT remote_id, key_version FROM remote_identity
             WHERE entity_type = ?1 AND local_id = ?2",
            params![kind.as_str(), local_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
        )
        .optional()?;
    Ok(row.map(|(remote_id, key_version)| RemoteIdentity {
        entity_type: kind,
        local_id,
        remote_id,
        key_version,
    }))
}

/// Replace the remote id after a keyed field changed, bumping key_version.
/// Returns the previous remote id so the caller can delete the stale document.
pub fn rotate_identity(
    conn: &Connection,
    kind: EntityKind,
    local_id: i64,
    new_remote_id: &str,
) -> Result<Option<String>, DatabaseError> {
    let previous = get_identity(conn, kind, local_id)?;
    conn.execute(
        "INSERT INTO remote_identity (entity_type, local_id, remote_id, key_version)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT (entity_type, local_id)
         DO UPDATE SET remote_id = excluded.remote_id, key_version = key_version + 1",
        params![kind.as_str(), local_id, new_remote_id],
    )?;
    Ok(previous.map(|p| p.remote_id))
}

pub fn delete_identity(
    conn: &Connection,
    kind: EntityKind,
    local_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM remote_identity WHERE entity_type = ?1 AND local_id = ?2",
        params![kind.as_str(), local_id],
    )?;
    Ok(())
}
