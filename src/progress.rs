//! Treatment Progress Tracker — per-treatment day-completion counters.
//!
//! A day counts as completed when every dose for (treatment, date) is TAKEN.
//! The `completed_days` ledger makes the increment idempotent: replaying the
//! check against an already-counted day changes nothing.

use rusqlite::{params, Connection};

use crate::db::{self, DatabaseError};
use crate::models::DoseStatus;
use crate::reconcile::{self, ReconcileError};

/// Re-check day completion after a dose transitioned to TAKEN. Returns
/// whether `days_completed` was incremented.
pub fn record_if_day_complete(
    conn: &Connection,
    treatment_id: i64,
    date: &str,
) -> Result<bool, ReconcileError> {
    let doses = db::doses_for_treatment_on_date(conn, treatment_id, date)?;
    if doses.is_empty() || doses.iter().any(|d| d.status != DoseStatus::Taken) {
        return Ok(false);
    }

    if !mark_day_completed(conn, treatment_id, date)? {
        tracing::debug!(treatment_id, date, "day already counted");
        return Ok(false);
    }

    let Some(mut treatment) = db::get_treatment(conn, treatment_id)? else {
        tracing::debug!(treatment_id, "treatment gone before progress update");
        return Ok(false);
    };
    treatment.days_completed = (treatment.days_completed + 1).min(treatment.duration_in_days);
    db::set_days_completed(conn, treatment_id, treatment.days_completed)?;
    reconcile::mirror_treatment_upsert(conn, &treatment)?;
    tracing::info!(
        treatment_id,
        date,
        days_completed = treatment.days_completed,
        "treatment day completed"
    );
    Ok(true)
}

/// Insert into the ledger; false when the day was already recorded.
fn mark_day_completed(
    conn: &Connection,
    treatment_id: i64,
    date: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO completed_days (treatment_id, date) VALUES (?1, ?2)",
        params![treatment_id, date],
    )?;
    Ok(changed > 0)
}
