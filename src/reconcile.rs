//! Reconciler — merges the remote dose/treatment collections into the local
//! store without duplicating rows, using the composite de-duplication key.
//!
//! Incoming status changes are only compared against *today's* local doses.
//! That window is the observed behavior of earlier clients and is kept as-is:
//! a remote status change on a dose dated any other day is never merged by
//! this path. Inserts are still safe on any date because the unique key index
//! swallows re-inserts of rows that already exist.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::Connection;
use thiserror::Error;

use crate::db::{self, DatabaseError};
use crate::generator::expand_treatment;
use crate::models::{Dose, DoseKey, EntityKind, OutboxOp, Treatment, DATE_FMT};
use crate::remote::{
    dose_doc_id, treatment_doc_id, DoseDoc, RemoteDoseEvent, RemoteError, RemoteStore,
    TreatmentDoc,
};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What one pull pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub treatments_added: usize,
    pub doses_inserted: usize,
    pub doses_updated: usize,
}

/// Expand a treatment and insert only the occurrences whose de-duplication
/// key is not present locally yet. Inserted doses get an identity row and an
/// outbox upsert; already-present occurrences are left untouched.
pub fn insert_new_doses(
    conn: &Connection,
    treatment: &Treatment,
) -> Result<Vec<Dose>, ReconcileError> {
    let existing: std::collections::HashSet<DoseKey> =
        db::doses_for_treatment(conn, treatment.id)?
            .iter()
            .map(Dose::key)
            .collect();

    let mut inserted = Vec::new();
    for mut dose in expand_treatment(treatment) {
        if existing.contains(&dose.key()) {
            continue;
        }
        let Some(id) = db::insert_dose(conn, &dose)? else {
            continue;
        };
        dose.id = id;
        mirror_dose_upsert(conn, &dose)?;
        inserted.push(dose);
    }

    tracing::debug!(
        treatment_id = treatment.id,
        inserted = inserted.len(),
        "dose expansion complete"
    );
    Ok(inserted)
}

/// Record the identity mapping for a dose and enqueue its upsert.
pub fn mirror_dose_upsert(conn: &Connection, dose: &Dose) -> Result<(), ReconcileError> {
    let doc_id = dose_doc_id(dose);
    db::record_identity(conn, EntityKind::Dose, dose.id, &doc_id)?;
    let payload = serde_json::to_string(&DoseDoc::from(dose))?;
    db::enqueue_outbox(conn, EntityKind::Dose, OutboxOp::Upsert, &doc_id, Some(&payload))?;
    Ok(())
}

/// Record the identity mapping for a treatment and enqueue its upsert.
pub fn mirror_treatment_upsert(
    conn: &Connection,
    treatment: &Treatment,
) -> Result<(), ReconcileError> {
    let doc_id = treatment_doc_id(treatment.id);
    db::record_identity(conn, EntityKind::Treatment, treatment.id, &doc_id)?;
    let payload = serde_json::to_string(&TreatmentDoc::from(treatment))?;
    db::enqueue_outbox(
        conn,
        EntityKind::Treatment,
        OutboxOp::Upsert,
        &doc_id,
        Some(&payload),
    )?;
    Ok(())
}

/// One full pull from the remote store: doses first (so statuses survive),
/// then treatments, generating doses only for treatments we did not know.
pub async fn pull_from_remote<R: RemoteStore>(
    db: &Mutex<Connection>,
    remote: &R,
    user_id: &str,
    today: NaiveDate,
) -> Result<PullSummary, ReconcileError> {
    // Fetch both collections before taking the connection lock; nothing
    // below holds the lock across an await point.
    let cloud_doses = remote.fetch_doses(user_id).await?;
    let cloud_treatments = remote.fetch_treatments(user_id).await?;
    tracing::debug!(
        user_id,
        doses = cloud_doses.len(),
        treatments = cloud_treatments.len(),
        "remote fetch complete"
    );

    let conn = db.lock().expect("db lock");
    let mut summary = merge_remote_doses(&conn, cloud_doses, today)?;

    let local_ids: std::collections::HashSet<i64> = db::list_treatments(&conn)?
        .iter()
        .map(|t| t.id)
        .collect();

    for doc in cloud_treatments {
        let treatment = doc.into_treatment()?;
        if local_ids.contains(&treatment.id) {
            continue;
        }
        if !db::insert_treatment_with_id(&conn, &treatment)? {
            continue;
        }
        db::record_identity(
            &conn,
            EntityKind::Treatment,
            treatment.id,
            &treatment_doc_id(treatment.id),
        )?;
        summary.treatments_added += 1;
        summary.doses_inserted += insert_new_doses(&conn, &treatment)?.len();
        tracing::info!(
            treatment_id = treatment.id,
            name = %treatment.medication_name,
            "treatment adopted from remote"
        );
    }

    tracing::info!(
        user_id,
        treatments_added = summary.treatments_added,
        doses_inserted = summary.doses_inserted,
        doses_updated = summary.doses_updated,
        "pull reconciliation complete"
    );
    Ok(summary)
}

/// Merge remote doses against today's local set (the observed window).
fn merge_remote_doses(
    conn: &Connection,
    cloud_doses: Vec<DoseDoc>,
    today: NaiveDate,
) -> Result<PullSummary, ReconcileError> {
    let today_str = today.format(DATE_FMT).to_string();
    let local_today: HashMap<DoseKey, Dose> = db::doses_for_date(conn, &today_str)?
        .into_iter()
        .map(|d| (d.key(), d))
        .collect();

    let mut summary = PullSummary::default();
    for doc in cloud_doses {
        let incoming = doc.into_dose();
        match local_today.get(&incoming.key()) {
            Some(local) => {
                if local.status != incoming.status {
                    let mut updated = local.clone();
                    updated.status = incoming.status;
                    updated.taken_at = incoming.taken_at;
                    updated.postpone_count = incoming.postpone_count;
                    db::update_dose(conn, &updated)?;
                    summary.doses_updated += 1;
                }
            }
            None => {
                // Not in today's window. Insert; the unique key index turns
                // this into a no-op when the row exists on another date.
                if let Some(id) = db::insert_dose(conn, &incoming)? {
                    db::record_identity(conn, EntityKind::Dose, id, &dose_doc_id(&incoming))?;
                    summary.doses_inserted += 1;
                }
            }
        }
    }
    Ok(summary)
}

/// Apply a single modified-document event from the remote change listener.
/// The dose is located by its de-duplication key; an unknown key is a no-op.
pub fn apply_remote_dose_change(
    conn: &Connection,
    event: &RemoteDoseEvent,
) -> Result<bool, ReconcileError> {
    let RemoteDoseEvent::Modified(doc) = event;
    let siblings = db::doses_for_treatment_on_date(conn, doc.treatment_id, &doc.date)?;
    let Some(local) = siblings
        .into_iter()
        .find(|d| d.time == doc.time && d.medication_name == doc.medication_name)
    else {
        tracing::debug!(
            treatment_id = doc.treatment_id,
            date = %doc.date,
            time = %doc.time,
            "remote change for unknown dose ignored"
        );
        return Ok(false);
    };

    let mut updated = local;
    updated.status = doc.status;
    updated.taken_at = doc.taken_at;
    updated.postpone_count = doc.postpone_count;
    db::update_dose(conn, &updated)?;
    tracing::debug!(dose_id = updated.id, status = updated.status.as_str(), "remote change applied");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::models::{DoseStatus, TreatmentInput};
    use crate::remote::InMemoryRemoteStore;
    use chrono::Utc;

    const USER: &str = "user-1";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn insert_local_treatment(conn: &Connection) -> Treatment {
        db::insert_treatment(
            conn,
            TreatmentInput {
                medication_name: "Paracetamol".into(),
                dosage: "500mg".into(),
                start_date: today(),
                duration_in_days: 2,
                frequency_per_day: 2,
                start_hour: 8,
                start_minute: 0,
                interval_hours: 12,
            },
        )
        .unwrap()
    }

    fn doc_for(dose: &Dose) -> DoseDoc {
        DoseDoc::from(dose)
    }

    #[test]
    fn expansion_is_idempotent() {
        let conn = open_memory_database().unwrap();
        let treatment = insert_local_treatment(&conn);
        let first = insert_new_doses(&conn, &treatment).unwrap();
        assert_eq!(first.len(), 4);
        let second = insert_new_doses(&conn, &treatment).unwrap();
        assert!(second.is_empty());
        assert_eq!(db::doses_for_treatment(&conn, treatment.id).unwrap().len(), 4);
    }

    #[test]
    fn expansion_enqueues_outbox_and_identity() {
        let conn = open_memory_database().unwrap();
        let treatment = insert_local_treatment(&conn);
        let inserted = insert_new_doses(&conn, &treatment).unwrap();
        assert_eq!(db::outbox_len(&conn).unwrap() as usize, inserted.len());
        for dose in &inserted {
            let identity = db::get_identity(&conn, EntityKind::Dose, dose.id)
                .unwrap()
                .unwrap();
            assert_eq!(identity.remote_id, dose_doc_id(dose));
        }
    }

    #[tokio::test]
    async fn pull_into_empty_store_inserts_everything() {
        let db = Mutex::new(open_memory_database().unwrap());
        let remote = InMemoryRemoteStore::new();

        let treatment = Treatment {
            id: 42,
            medication_name: "Ibuprofen".into(),
            dosage: "200mg".into(),
            start_date: today(),
            duration_in_days: 1,
            frequency_per_day: 2,
            start_hour: 9,
            start_minute: 0,
            interval_hours: 8,
            days_completed: 0,
        };
        remote.seed_treatment(USER, "42", TreatmentDoc::from(&treatment));

        let summary = pull_from_remote(&db, &remote, USER, today()).await.unwrap();
        assert_eq!(summary.treatments_added, 1);
        assert_eq!(summary.doses_inserted, 2);

        let conn = db.lock().unwrap();
        assert!(db::get_treatment(&conn, 42).unwrap().is_some());
        assert_eq!(db::doses_for_treatment(&conn, 42).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pull_against_identical_set_changes_nothing() {
        let db = Mutex::new(open_memory_database().unwrap());
        let remote = InMemoryRemoteStore::new();

        let (treatment, doses) = {
            let conn = db.lock().unwrap();
            let treatment = insert_local_treatment(&conn);
            let doses = insert_new_doses(&conn, &treatment).unwrap();
            (treatment, doses)
        };
        remote.seed_treatment(
            USER,
            &treatment_doc_id(treatment.id),
            TreatmentDoc::from(&treatment),
        );
        for dose in &doses {
            remote.seed_dose(USER, &dose_doc_id(dose), doc_for(dose));
        }

        let summary = pull_from_remote(&db, &remote, USER, today()).await.unwrap();
        assert_eq!(summary, PullSummary::default());
    }

    #[tokio::test]
    async fn pull_overwrites_differing_status_for_today() {
        let db = Mutex::new(open_memory_database().unwrap());
        let remote = InMemoryRemoteStore::new();

        let doses = {
            let conn = db.lock().unwrap();
            let treatment = insert_local_treatment(&conn);
            insert_new_doses(&conn, &treatment).unwrap()
        };
        let mut taken = doc_for(&doses[0]);
        taken.status = DoseStatus::Taken;
        taken.taken_at = Some(Utc::now());
        remote.seed_dose(USER, &dose_doc_id(&doses[0]), taken);

        let summary = pull_from_remote(&db, &remote, USER, today()).await.unwrap();
        assert_eq!(summary.doses_updated, 1);

        let conn = db.lock().unwrap();
        let merged = db::get_dose(&conn, doses[0].id).unwrap().unwrap();
        assert_eq!(merged.status, DoseStatus::Taken);
        assert!(merged.taken_at.is_some());
    }

    #[tokio::test]
    async fn status_change_outside_today_window_is_not_merged() {
        let db = Mutex::new(open_memory_database().unwrap());
        let remote = InMemoryRemoteStore::new();

        let doses = {
            let conn = db.lock().unwrap();
            let treatment = insert_local_treatment(&conn);
            insert_new_doses(&conn, &treatment).unwrap()
        };
        // doses[2] is dated 2024-01-02; pull runs "today" = 2024-01-01.
        let mut taken = doc_for(&doses[2]);
        taken.status = DoseStatus::Taken;
        remote.seed_dose(USER, &dose_doc_id(&doses[2]), taken);

        let summary = pull_from_remote(&db, &remote, USER, today()).await.unwrap();
        assert_eq!(summary.doses_updated, 0);
        assert_eq!(summary.doses_inserted, 0);

        let conn = db.lock().unwrap();
        let untouched = db::get_dose(&conn, doses[2].id).unwrap().unwrap();
        assert_eq!(untouched.status, DoseStatus::Pending);
    }

    #[test]
    fn remote_change_event_updates_by_key() {
        let conn = open_memory_database().unwrap();
        let treatment = insert_local_treatment(&conn);
        let doses = insert_new_doses(&conn, &treatment).unwrap();

        let mut doc = doc_for(&doses[1]);
        doc.status = DoseStatus::Taken;
        doc.taken_at = Some(Utc::now());
        let applied =
            apply_remote_dose_change(&conn, &RemoteDoseEvent::Modified(doc)).unwrap();
        assert!(applied);
        let merged = db::get_dose(&conn, doses[1].id).unwrap().unwrap();
        assert_eq!(merged.status, DoseStatus::Taken);
    }

    #[test]
    fn remote_change_for_unknown_dose_is_noop() {
        let conn = open_memory_database().unwrap();
        let doc = DoseDoc {
            treatment_id: 99,
            medication_name: "Ghost".into(),
            dosage: "1mg".into(),
            date: "2024-01-01".into(),
            time: "10:00".into(),
            status: DoseStatus::Taken,
            postpone_count: 0,
            taken_at: None,
        };
        let applied =
            apply_remote_dose_change(&conn, &RemoteDoseEvent::Modified(doc)).unwrap();
        assert!(!applied);
    }
}
