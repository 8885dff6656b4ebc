use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::{EntityKind, Treatment, TreatmentInput};

/// Insert a new treatment and return it with the store-assigned id.
pub fn insert_treatment(
    conn: &Connection,
    input: TreatmentInput,
) -> Result<Treatment, DatabaseError> {
    conn.execute(
        "INSERT INTO treatments (medication_name, dosage, start_date, duration_in_days,
         frequency_per_day, start_hour, start_minute, interval_hours, days_completed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            input.medication_name,
            input.dosage,
            input.start_date,
            input.duration_in_days,
            input.frequency_per_day,
            input.start_hour,
            input.start_minute,
            input.interval_hours,
        ],
    )?;
    Ok(input.into_treatment(conn.last_insert_rowid()))
}

/// Insert a treatment that already carries an id (remote-originated merge).
/// An existing row with the same id is left untouched.
pub fn insert_treatment_with_id(
    conn: &Connection,
    treatment: &Treatment,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO treatments (id, medication_name, dosage, start_date,
         duration_in_days, frequency_per_day, start_hour, start_minute, interval_hours,
         days_completed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            treatment.id,
            treatment.medication_name,
            treatment.dosage,
            treatment.start_date,
            treatment.duration_in_days,
            treatment.frequency_per_day,
            treatment.start_hour,
            treatment.start_minute,
            treatment.interval_hours,
            treatment.days_completed,
        ],
    )?;
    Ok(changed > 0)
}

pub fn update_treatment(conn: &Connection, treatment: &Treatment) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE treatments SET medication_name = ?2, dosage = ?3, start_date = ?4,
         duration_in_days = ?5, frequency_per_day = ?6, start_hour = ?7,
         start_minute = ?8, interval_hours = ?9, days_completed = ?10
         WHERE id = ?1",
        params![
            treatment.id,
            treatment.medication_name,
            treatment.dosage,
            treatment.start_date,
            treatment.duration_in_days,
            treatment.frequency_per_day,
            treatment.start_hour,
            treatment.start_minute,
            treatment.interval_hours,
            treatment.days_completed,
        ],
    )?;
    Ok(())
}

pub fn get_treatment(conn: &Connection, id: i64) -> Result<Option<Treatment>, DatabaseError> {
    let treatment = conn
        .query_row(
            "SELECT id, medication_name, dosage, start_date, duration_in_days,
             frequency_per_day, start_hour, start_minute, interval_hours, days_completed
             FROM treatments WHERE id = ?1",
            params![id],
            treatment_from_row,
        )
        .optional()?;
    Ok(treatment)
}

/// All treatments, most recently started first.
pub fn list_treatments(conn: &Connection) -> Result<Vec<Treatment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, medication_name, dosage, start_date, duration_in_days,
         frequency_per_day, start_hour, start_minute, interval_hours, days_completed
         FROM treatments ORDER BY start_date DESC, id DESC",
    )?;
    let rows = stmt.query_map([], treatment_from_row)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn set_days_completed(conn: &Connection, id: i64, days: u32) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE treatments SET days_completed = ?2 WHERE id = ?1",
        params![id, days],
    )?;
    Ok(())
}

/// Delete a treatment together with its doses, schedule rows, identity rows
/// and completed-day ledger, in one transaction.
pub fn delete_treatment_cascade(
    conn: &mut Connection,
    treatment_id: i64,
) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM remote_identity WHERE entity_type = ?1
         AND local_id IN (SELECT id FROM daily_doses WHERE treatment_id = ?2)",
        params![EntityKind::Dose.as_str(), treatment_id],
    )?;
    tx.execute(
        "DELETE FROM remote_identity WHERE entity_type = ?1 AND local_id = ?2",
        params![EntityKind::Treatment.as_str(), treatment_id],
    )?;
    tx.execute(
        "DELETE FROM reminder_schedule WHERE treatment_id = ?1",
        params![treatment_id],
    )?;
    tx.execute(
        "DELETE FROM completed_days WHERE treatment_id = ?1",
        params![treatment_id],
    )?;
    tx.execute(
        "DELETE FROM daily_doses WHERE treatment_id = ?1",
        params![treatment_id],
    )?;
    tx.execute("DELETE FROM treatments WHERE id = ?1", params![treatment_id])?;
    tx.commit()?;
    tracing::debug!(treatment_id, "treatment and its doses deleted");
    Ok(())
}

/// Wipe every table (logout path).
pub fn clear_all_data(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "DELETE FROM reminder_schedule;
         DELETE FROM outbox;
         DELETE FROM remote_identity;
         DELETE FROM completed_days;
         DELETE FROM daily_doses;
         DELETE FROM treatments;",
    )?;
    tracing::debug!("all local data cleared");
    Ok(())
}

fn treatment_from_row(row: &rusqlite::Row<'_>) -> Result<Treatment, rusqlite::Error> {
    Ok(Treatment {
        id: row.get(0)?,
        medication_name: row.get(1)?,
        dosage: row.get(2)?,
        start_date: row.get(3)?,
        duration_in_days: row.get(4)?,
        frequency_per_day: row.get(5)?,
        start_hour: row.get(6)?,
        start_minute: row.get(7)?,
        interval_hours: row.get(8)?,
        days_completed: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use chrono::NaiveDate;

    fn input(name: &str) -> TreatmentInput {
        TreatmentInput {
            medication_name: name.into(),
            dosage: "500mg".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            duration_in_days: 3,
            frequency_per_day: 2,
            start_hour: 8,
            start_minute: 0,
            interval_hours: 12,
        }
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let conn = open_memory_database().unwrap();
        let a = insert_treatment(&conn, input("Paracetamol")).unwrap();
        let b = insert_treatment(&conn, input("Ibuprofen")).unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.days_completed, 0);
    }

    #[test]
    fn insert_with_id_ignores_existing() {
        let conn = open_memory_database().unwrap();
        let t = insert_treatment(&conn, input("Paracetamol")).unwrap();
        let mut incoming = t.clone();
        incoming.medication_name = "Overwritten".into();
        assert!(!insert_treatment_with_id(&conn, &incoming).unwrap());
        let kept = get_treatment(&conn, t.id).unwrap().unwrap();
        assert_eq!(kept.medication_name, "Paracetamol");
    }

    #[test]
    fn cascade_delete_leaves_no_orphans() {
        let mut conn = open_memory_database().unwrap();
        let t = insert_treatment(&conn, input("Paracetamol")).unwrap();
        conn.execute(
            "INSERT INTO daily_doses (treatment_id, medication_name, dosage, date, time)
             VALUES (?1, 'Paracetamol', '500mg', '2024-01-01', '08:00')",
            params![t.id],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO completed_days (treatment_id, date) VALUES (?1, '2024-01-01')",
            params![t.id],
        )
        .unwrap();
        delete_treatment_cascade(&mut conn, t.id).unwrap();
        let doses: i64 = conn
            .query_row("SELECT COUNT(*) FROM daily_doses", [], |r| r.get(0))
            .unwrap();
        let days: i64 = conn
            .query_row("SELECT COUNT(*) FROM completed_days", [], |r| r.get(0))
            .unwrap();
        assert_eq!((doses, days), (0, 0));
        assert!(get_treatment(&conn, t.id).unwrap().is_none());
    }

    #[test]
    fn list_orders_by_start_date_desc() {
        let conn = open_memory_database().unwrap();
        let mut older = input("Old");
        older.start_date = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        insert_treatment(&conn, older).unwrap();
        insert_treatment(&conn, input("New")).unwrap();
        let all = list_treatments(&conn).unwrap();
        assert_eq!(all[0].medication_name, "New");
    }
}
