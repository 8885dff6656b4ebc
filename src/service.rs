//! Treatment service — orchestrates every user-facing operation:
//! local write first, remote mirror via the outbox, then reminder
//! (re)scheduling and progress recompute.

use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::config;
use crate::db::{self, DatabaseError};
use crate::models::{Dose, DoseStatus, EntityKind, OutboxOp, Treatment, TreatmentInput, TIME_FMT};
use crate::progress;
use crate::reconcile::{self, PullSummary, ReconcileError};
use crate::remote::{dose_doc_id, treatment_doc_id, RemoteDoseEvent, RemoteStore};
use crate::scheduler::{AlarmBackend, ReminderScheduler};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Result of a postpone request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostponeOutcome {
    Postponed(Dose),
    /// The dose already used both postpones; nothing changed.
    LimitReached,
    NotFound,
}

pub struct TreatmentService<R: RemoteStore, A: AlarmBackend> {
    db: Arc<Mutex<Connection>>,
    remote: Arc<R>,
    scheduler: ReminderScheduler<A>,
    user_id: String,
}

impl<R: RemoteStore, A: AlarmBackend> TreatmentService<R, A> {
    pub fn new(db: Arc<Mutex<Connection>>, remote: Arc<R>, backend: A, user_id: &str) -> Self {
        Self {
            db,
            remote,
            scheduler: ReminderScheduler::new(backend),
            user_id: user_id.to_string(),
        }
    }

    /// Rebuild reminder timers from the durable schedule (process restart).
    pub fn start(&self) -> Result<usize, ServiceError> {
        let conn = self.db.lock().expect("db lock");
        let rebuilt = self.scheduler.rebuild(&conn, Local::now().naive_local())?;
        Ok(rebuilt)
    }

    /// Register a treatment: local insert, remote mirror, full dose
    /// expansion, reminder scheduling.
    pub fn add_treatment(&self, input: TreatmentInput) -> Result<Treatment, ServiceError> {
        let conn = self.db.lock().expect("db lock");
        let treatment = db::insert_treatment(&conn, input)?;
        reconcile::mirror_treatment_upsert(&conn, &treatment)?;
        let doses = reconcile::insert_new_doses(&conn, &treatment)?;
        let now = Local::now().naive_local();
        for dose in &doses {
            self.scheduler.schedule_dose(&conn, dose, now)?;
        }
        tracing::info!(
            treatment_id = treatment.id,
            name = %treatment.medication_name,
            doses = doses.len(),
            "treatment registered"
        );
        Ok(treatment)
    }

    /// Edit a treatment: cancel its timers, drop its doses (locally and
    /// remotely), regenerate from the new definition and reschedule.
    pub fn edit_treatment(&self, updated: &Treatment) -> Result<(), ServiceError> {
        let conn = self.db.lock().expect("db lock");
        if db::get_treatment(&conn, updated.id)?.is_none() {
            tracing::debug!(treatment_id = updated.id, "edit of unknown treatment ignored");
            return Ok(());
        }

        self.scheduler.cancel_treatment(&conn, updated.id)?;
        for dose in db::doses_for_treatment(&conn, updated.id)? {
            self.enqueue_dose_delete(&conn, &dose)?;
            db::delete_dose(&conn, dose.id)?;
        }

        db::update_treatment(&conn, updated)?;
        reconcile::mirror_treatment_upsert(&conn, updated)?;
        let doses = reconcile::insert_new_doses(&conn, updated)?;
        let now = Local::now().naive_local();
        for dose in &doses {
            self.scheduler.schedule_dose(&conn, dose, now)?;
        }
        tracing::info!(treatment_id = updated.id, doses = doses.len(), "treatment edited");
        Ok(())
    }

    /// Delete a treatment and everything hanging off it.
    pub fn delete_treatment(&self, treatment_id: i64) -> Result<(), ServiceError> {
        let mut conn = self.db.lock().expect("db lock");
        self.scheduler.cancel_treatment(&conn, treatment_id)?;
        for dose in db::doses_for_treatment(&conn, treatment_id)? {
            self.enqueue_dose_delete(&conn, &dose)?;
        }
        db::enqueue_outbox(
            &conn,
            EntityKind::Treatment,
            OutboxOp::Delete,
            &treatment_doc_id(treatment_id),
            None,
        )?;
        db::delete_treatment_cascade(&mut conn, treatment_id)?;
        Ok(())
    }

    /// Mark a dose TAKEN, cancel its reminder, mirror the change and
    /// recompute day completion. An unknown id is a silent no-op.
    pub fn confirm_dose(&self, dose_id: i64) -> Result<Option<Dose>, ServiceError> {
        let conn = self.db.lock().expect("db lock");
        let Some(mut dose) = db::get_dose(&conn, dose_id)? else {
            tracing::debug!(dose_id, "confirm for unknown dose ignored");
            return Ok(None);
        };

        dose.status = DoseStatus::Taken;
        dose.taken_at = Some(Utc::now());
        db::update_dose(&conn, &dose)?;
        self.scheduler.cancel_dose(&conn, dose_id)?;
        reconcile::mirror_dose_upsert(&conn, &dose)?;
        progress::record_if_day_complete(&conn, dose.treatment_id, &dose.date)?;
        tracing::info!(dose_id, name = %dose.medication_name, "dose confirmed");
        Ok(Some(dose))
    }

    /// Push a dose 15 minutes out, up to the postpone cap. The remote
    /// document is rotated because the time participates in its id.
    pub fn postpone_dose(&self, dose_id: i64) -> Result<PostponeOutcome, ServiceError> {
        let conn = self.db.lock().expect("db lock");
        let Some(dose) = db::get_dose(&conn, dose_id)? else {
            tracing::debug!(dose_id, "postpone for unknown dose ignored");
            return Ok(PostponeOutcome::NotFound);
        };
        if dose.postpone_count >= config::POSTPONE_LIMIT {
            tracing::info!(dose_id, "postpone limit reached, no action taken");
            return Ok(PostponeOutcome::LimitReached);
        }

        let time = NaiveTime::parse_from_str(&dose.time, TIME_FMT).map_err(|e| {
            DatabaseError::ConstraintViolation(format!("bad dose time {:?}: {e}", dose.time))
        })?;
        let mut postponed = dose.clone();
        postponed.time = (time + chrono::Duration::minutes(config::POSTPONE_MINUTES))
            .format(TIME_FMT)
            .to_string();
        postponed.postpone_count += 1;

        let old_doc_id = db::get_identity(&conn, EntityKind::Dose, dose_id)?
            .map(|i| i.remote_id)
            .unwrap_or_else(|| dose_doc_id(&dose));
        let new_doc_id = dose_doc_id(&postponed);

        db::update_dose(&conn, &postponed)?;
        db::enqueue_outbox(&conn, EntityKind::Dose, OutboxOp::Delete, &old_doc_id, None)?;
        db::rotate_identity(&conn, EntityKind::Dose, dose_id, &new_doc_id)?;
        let payload = serde_json::to_string(&crate::remote::DoseDoc::from(&postponed))
            .map_err(ReconcileError::from)?;
        db::enqueue_outbox(
            &conn,
            EntityKind::Dose,
            OutboxOp::Upsert,
            &new_doc_id,
            Some(&payload),
        )?;

        self.scheduler.cancel_dose(&conn, dose_id)?;
        self.scheduler
            .schedule_dose(&conn, &postponed, Local::now().naive_local())?;
        tracing::info!(
            dose_id,
            from = %dose.time,
            to = %postponed.time,
            count = postponed.postpone_count,
            "dose postponed"
        );
        Ok(PostponeOutcome::Postponed(postponed))
    }

    /// Pull-reconcile the remote collections into the local store.
    pub async fn sync_from_remote(&self) -> Result<PullSummary, ServiceError> {
        let summary = reconcile::pull_from_remote(
            &self.db,
            &*self.remote,
            &self.user_id,
            Local::now().date_naive(),
        )
        .await?;
        Ok(summary)
    }

    /// Apply one change observed by the host's remote listener.
    pub fn apply_remote_event(&self, event: &RemoteDoseEvent) -> Result<(), ServiceError> {
        let conn = self.db.lock().expect("db lock");
        reconcile::apply_remote_dose_change(&conn, event)?;
        Ok(())
    }

    // ── Read path (UI observes the local store only) ────────────────────

    pub fn treatments(&self) -> Result<Vec<Treatment>, ServiceError> {
        let conn = self.db.lock().expect("db lock");
        Ok(db::list_treatments(&conn)?)
    }

    pub fn doses_for_date(&self, date: &str) -> Result<Vec<Dose>, ServiceError> {
        let conn = self.db.lock().expect("db lock");
        Ok(db::doses_for_date(&conn, date)?)
    }

    pub fn dose_history(&self) -> Result<Vec<Dose>, ServiceError> {
        let conn = self.db.lock().expect("db lock");
        Ok(db::dose_history(&conn)?)
    }

    /// Wipe all local data (logout).
    pub fn clear_local_data(&self) -> Result<(), ServiceError> {
        let conn = self.db.lock().expect("db lock");
        db::clear_all_data(&conn)?;
        Ok(())
    }

    fn enqueue_dose_delete(&self, conn: &Connection, dose: &Dose) -> Result<(), ServiceError> {
        let doc_id = db::get_identity(conn, EntityKind::Dose, dose.id)?
            .map(|i| i.remote_id)
            .unwrap_or_else(|| dose_doc_id(dose));
        db::enqueue_outbox(conn, EntityKind::Dose, OutboxOp::Delete, &doc_id, None)?;
        db::delete_identity(conn, EntityKind::Dose, dose.id)?;
        Ok(())
    }
}
