//! Missed-Dose Sweep — daily pass reclassifying overdue pending doses.
//!
//! The transition is local-only: earlier clients never mirrored MISSED to the
//! remote store, and that asymmetry is kept so both clients agree on what the
//! remote collection contains.

use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use tokio::sync::oneshot;

use crate::config;
use crate::db::{self, DatabaseError};
use crate::models::{DoseStatus, DATE_FMT};

/// Transition every PENDING dose dated strictly before `today` to MISSED.
/// Returns how many doses were swept.
pub fn sweep_missed(conn: &Connection, today: NaiveDate) -> Result<usize, DatabaseError> {
    let today_str = today.format(DATE_FMT).to_string();
    let overdue = db::pending_doses_before(conn, &today_str)?;
    if overdue.is_empty() {
        tracing::debug!("no overdue doses");
        return Ok(0);
    }

    for dose in &overdue {
        let mut missed = dose.clone();
        missed.status = DoseStatus::Missed;
        db::update_dose(conn, &missed)?;
    }
    tracing::info!(count = overdue.len(), "overdue doses marked missed");
    Ok(overdue.len())
}

/// Drive [`sweep_missed`] once per day until the shutdown channel fires.
pub async fn run_daily_sweep(db: Arc<Mutex<Connection>>, mut shutdown: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(config::SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let today = Local::now().date_naive();
                let conn = db.lock().expect("db lock");
                if let Err(e) = sweep_missed(&conn, today) {
                    tracing::error!(error = %e, "missed-dose sweep failed");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("missed-dose sweep stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::models::Dose;

    fn insert(conn: &Connection, date: &str, time: &str, status: DoseStatus) -> i64 {
        let mut dose = Dose {
            id: 0,
            treatment_id: 1,
            medication_name: "Paracetamol".into(),
            dosage: "500mg".into(),
            date: date.into(),
            time: time.into(),
            status: DoseStatus::Pending,
            postpone_count: 0,
            taken_at: None,
        };
        let id = db::insert_dose(conn, &dose).unwrap().unwrap();
        if status != DoseStatus::Pending {
            dose.id = id;
            dose.status = status;
            db::update_dose(conn, &dose).unwrap();
        }
        id
    }

    fn status_of(conn: &Connection, id: i64) -> DoseStatus {
        db::get_dose(conn, id).unwrap().unwrap().status
    }

    #[test]
    fn sweeps_only_pending_before_today() {
        let conn = open_memory_database().unwrap();
        let old_pending = insert(&conn, "2024-01-01", "08:00", DoseStatus::Pending);
        let old_taken = insert(&conn, "2024-01-01", "20:00", DoseStatus::Taken);
        let older_pending = insert(&conn, "2023-12-30", "08:00", DoseStatus::Pending);
        let today_pending = insert(&conn, "2024-01-02", "08:00", DoseStatus::Pending);

        let swept = sweep_missed(&conn, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).unwrap();
        assert_eq!(swept, 2);
        assert_eq!(status_of(&conn, old_pending), DoseStatus::Missed);
        assert_eq!(status_of(&conn, older_pending), DoseStatus::Missed);
        assert_eq!(status_of(&conn, old_taken), DoseStatus::Taken);
        assert_eq!(status_of(&conn, today_pending), DoseStatus::Pending);
    }

    #[test]
    fn sweep_is_not_mirrored_remotely() {
        let conn = open_memory_database().unwrap();
        insert(&conn, "2024-01-01", "08:00", DoseStatus::Pending);
        sweep_missed(&conn, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).unwrap();
        assert_eq!(db::outbox_len(&conn).unwrap(), 0);
    }

    #[test]
    fn empty_store_sweeps_nothing() {
        let conn = open_memory_database().unwrap();
        let swept = sweep_missed(&conn, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).unwrap();
        assert_eq!(swept, 0);
    }
}
