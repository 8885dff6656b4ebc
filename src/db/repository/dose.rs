use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::{Dose, DoseStatus};

/// Insert a dose, honoring the unique de-duplication index. Returns the
/// assigned id, or `None` when an identical (treatment, date, time, name)
/// row already exists.
pub fn insert_dose(conn: &Connection, dose: &Dose) -> Result<Option<i64>, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO daily_doses (treatment_id, medication_name, dosage, date,
         time, status, postpone_count, taken_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            dose.treatment_id,
            dose.medication_name,
            dose.dosage,
            dose.date,
            dose.time,
            dose.status.as_str(),
            dose.postpone_count,
            dose.taken_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

pub fn update_dose(conn: &Connection, dose: &Dose) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE daily_doses SET treatment_id = ?2, medication_name = ?3, dosage = ?4,
         date = ?5, time = ?6, status = ?7, postpone_count = ?8, taken_at = ?9
         WHERE id = ?1",
        params![
            dose.id,
            dose.treatment_id,
            dose.medication_name,
            dose.dosage,
            dose.date,
            dose.time,
            dose.status.as_str(),
            dose.postpone_count,
            dose.taken_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

pub fn get_dose(conn: &Connection, id: i64) -> Result<Option<Dose>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("{SELECT_DOSE} WHERE id = ?1"),
            params![id],
            dose_row,
        )
        .optional()?;
    row.map(dose_from_row).transpose()
}

/// All doses for one treatment, any date.
pub fn doses_for_treatment(
    conn: &Connection,
    treatment_id: i64,
) -> Result<Vec<Dose>, DatabaseError> {
    query_doses(
        conn,
        &format!("{SELECT_DOSE} WHERE treatment_id = ?1 ORDER BY date ASC, time ASC"),
        params![treatment_id],
    )
}

/// Doses for a treatment on one calendar date (day-completion check).
pub fn doses_for_treatment_on_date(
    conn: &Connection,
    treatment_id: i64,
    date: &str,
) -> Result<Vec<Dose>, DatabaseError> {
    query_doses(
        conn,
        &format!("{SELECT_DOSE} WHERE treatment_id = ?1 AND date = ?2 ORDER BY time ASC"),
        params![treatment_id, date],
    )
}

/// The day's schedule, ordered by time (the UI's reactive read path).
pub fn doses_for_date(conn: &Connection, date: &str) -> Result<Vec<Dose>, DatabaseError> {
    query_doses(
        conn,
        &format!("{SELECT_DOSE} WHERE date = ?1 ORDER BY time ASC"),
        params![date],
    )
}

/// Pending doses dated strictly before the given date (missed-dose sweep).
pub fn pending_doses_before(conn: &Connection, date: &str) -> Result<Vec<Dose>, DatabaseError> {
    query_doses(
        conn,
        &format!("{SELECT_DOSE} WHERE date < ?1 AND status = 'PENDING' ORDER BY date ASC, time ASC"),
        params![date],
    )
}

/// Past taken/missed doses, newest first (history screen).
pub fn dose_history(conn: &Connection) -> Result<Vec<Dose>, DatabaseError> {
    query_doses(
        conn,
        &format!(
            "{SELECT_DOSE} WHERE status IN ('TAKEN', 'MISSED') ORDER BY date DESC, time DESC"
        ),
        [],
    )
}

pub fn delete_dose(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM daily_doses WHERE id = ?1", params![id])?;
    Ok(())
}

const SELECT_DOSE: &str = "SELECT id, treatment_id, medication_name, dosage, date, time,
     status, postpone_count, taken_at FROM daily_doses";

// Internal row type, mapped before enum/timestamp parsing.
struct DoseRow {
    id: i64,
    treatment_id: i64,
    medication_name: String,
    dosage: String,
    date: String,
    time: String,
    status: String,
    postpone_count: u32,
    taken_at: Option<String>,
}

fn dose_row(row: &rusqlite::Row<'_>) -> Result<DoseRow, rusqlite::Error> {
    Ok(DoseRow {
        id: row.get(0)?,
        treatment_id: row.get(1)?,
        medication_name: row.get(2)?,
        dosage: row.get(3)?,
        date: row.get(4)?,
        time: row.get(5)?,
        status: row.get(6)?,
        postpone_count: row.get(7)?,
        taken_at: row.get(8)?,
    })
}

fn dose_from_row(row: DoseRow) -> Result<Dose, DatabaseError> {
    let taken_at = match row.taken_at {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    DatabaseError::ConstraintViolation(format!("bad taken_at {raw:?}: {e}"))
                })?,
        ),
        None => None,
    };
    Ok(Dose {
        id: row.id,
        treatment_id: row.treatment_id,
        medication_name: row.medication_name,
        dosage: row.dosage,
        date: row.date,
        time: row.time,
        status: DoseStatus::from_str(&row.status)?,
        postpone_count: row.postpone_count,
        taken_at,
    })
}

fn query_doses<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Dose>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, dose_row)?;
    let mut doses = Vec::new();
    for row in rows {
        doses.push(dose_from_row(row?)?);
    }
    Ok(doses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn dose(treatment_id: i64, date: &str, time: &str) -> Dose {
        Dose {
            id: 0,
            treatment_id,
            medication_name: "Paracetamol".into(),
            dosage: "500mg".into(),
            date: date.into(),
            time: time.into(),
            status: DoseStatus::Pending,
            postpone_count: 0,
            taken_at: None,
        }
    }

    #[test]
    fn duplicate_key_is_ignored() {
        let conn = open_memory_database().unwrap();
        let d = dose(1, "2024-01-01", "08:00");
        assert!(insert_dose(&conn, &d).unwrap().is_some());
        assert!(insert_dose(&conn, &d).unwrap().is_none());
        assert_eq!(doses_for_treatment(&conn, 1).unwrap().len(), 1);
    }

    #[test]
    fn round_trip_preserves_status_and_timestamp() {
        let conn = open_memory_database().unwrap();
        let mut d = dose(1, "2024-01-01", "08:00");
        let id = insert_dose(&conn, &d).unwrap().unwrap();
        d.id = id;
        d.status = DoseStatus::Taken;
        d.taken_at = Some(Utc::now());
        update_dose(&conn, &d).unwrap();
        let got = get_dose(&conn, id).unwrap().unwrap();
        assert_eq!(got.status, DoseStatus::Taken);
        assert!(got.taken_at.is_some());
    }

    #[test]
    fn pending_before_excludes_today_and_taken() {
        let conn = open_memory_database().unwrap();
        insert_dose(&conn, &dose(1, "2024-01-01", "08:00")).unwrap();
        let mut taken = dose(1, "2024-01-01", "20:00");
        taken.status = DoseStatus::Taken;
        let id = insert_dose(&conn, &taken).unwrap().unwrap();
        taken.id = id;
        update_dose(&conn, &taken).unwrap();
        insert_dose(&conn, &dose(1, "2024-01-02", "08:00")).unwrap();

        let pending = pending_doses_before(&conn, "2024-01-02").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].time, "08:00");
        assert_eq!(pending[0].date, "2024-01-01");
    }

    #[test]
    fn doses_for_date_ordered_by_time() {
        let conn = open_memory_database().unwrap();
        insert_dose(&conn, &dose(1, "2024-01-01", "20:00")).unwrap();
        insert_dose(&conn, &dose(2, "2024-01-01", "08:00")).unwrap();
        let day = doses_for_date(&conn, "2024-01-01").unwrap();
        assert_eq!(day[0].time, "08:00");
        assert_eq!(day[1].time, "20:00");
    }
}
