//! Remote Store Adapter — per-user document collections mirroring the local
//! treatment and dose tables.
//!
//! The remote store is a sync target/source only; the UI never reads it
//! synchronously. Documents use the field casing written by earlier mobile
//! clients so a shared account keeps working across app versions.

pub mod http;
pub mod memory;

pub use http::HttpRemoteStore;
pub use memory::InMemoryRemoteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Dose, DoseStatus, Treatment, DATE_FMT};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed document {doc_id}: {reason}")]
    MalformedDocument { doc_id: String, reason: String },
}

/// Treatment document in the per-user remote collection, keyed by the local
/// integer id rendered as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentDoc {
    pub id: i64,
    pub medication_name: String,
    pub dosage: String,
    /// `%Y-%m-%d`
    pub start_date: String,
    pub duration_in_days: u32,
    pub frequency_per_day: u32,
    pub start_hour: u32,
    pub start_minute: u32,
    pub interval_hours: u32,
    pub days_completed: u32,
}

/// Dose document in the per-user remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseDoc {
    pub treatment_id: i64,
    pub medication_name: String,
    pub dosage: String,
    pub date: String,
    pub time: String,
    pub status: DoseStatus,
    #[serde(default)]
    pub postpone_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

/// A change observed on the remote dose collection, as delivered by the
/// host's change listener (the listener transport itself lives outside this
/// crate).
#[derive(Debug, Clone)]
pub enum RemoteDoseEvent {
    Modified(DoseDoc),
}

/// Abstract per-user document store. Implementations must be safe to call
/// concurrently; every operation is best-effort from the caller's point of
/// view — failures end up in the outbox for retry, never in the UI.
pub trait RemoteStore: Send + Sync {
    fn put_treatment(
        &self,
        user_id: &str,
        doc_id: &str,
        doc: &TreatmentDoc,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    fn delete_treatment(
        &self,
        user_id: &str,
        doc_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    fn fetch_treatments(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<TreatmentDoc>, RemoteError>> + Send;

    fn put_dose(
        &self,
        user_id: &str,
        doc_id: &str,
        doc: &DoseDoc,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    fn delete_dose(
        &self,
        user_id: &str,
        doc_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    fn fetch_doses(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<DoseDoc>, RemoteError>> + Send;
}

/// Remote document id for a treatment: the local integer id as a string.
pub fn treatment_doc_id(treatment_id: i64) -> String {
    treatment_id.to_string()
}

/// Remote document id for a dose: `{treatmentId}_{date}_{time}_{nameHash}`.
///
/// `nameHash` is the JVM 32-bit string hash of the medication name —
/// documents written by the original mobile client are keyed this way, so the
/// same dose resolves to the same document id from either client.
pub fn dose_doc_id(dose: &Dose) -> String {
    format!(
        "{}_{}_{}_{}",
        dose.treatment_id,
        dose.date,
        dose.time,
        jvm_string_hash(&dose.medication_name)
    )
}

fn jvm_string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

impl From<&Treatment> for TreatmentDoc {
    fn from(t: &Treatment) -> Self {
        TreatmentDoc {
            id: t.id,
            medication_name: t.medication_name.clone(),
            dosage: t.dosage.clone(),
            start_date: t.start_date.format(DATE_FMT).to_string(),
            duration_in_days: t.duration_in_days,
            frequency_per_day: t.frequency_per_day,
            start_hour: t.start_hour,
            start_minute: t.start_minute,
            interval_hours: t.interval_hours,
            days_completed: t.days_completed,
        }
    }
}

impl TreatmentDoc {
    /// Materialize as a local treatment row, keeping the remote-assigned id.
    pub fn into_treatment(self) -> Result<Treatment, RemoteError> {
        let start_date = chrono::NaiveDate::parse_from_str(&self.start_date, DATE_FMT)
            .map_err(|e| RemoteError::MalformedDocument {
                doc_id: treatment_doc_id(self.id),
                reason: format!("bad startDate {:?}: {e}", self.start_date),
            })?;
        Ok(Treatment {
            id: self.id,
            medication_name: self.medication_name,
            dosage: self.dosage,
            start_date,
            duration_in_days: self.duration_in_days,
            frequency_per_day: self.frequency_per_day,
            start_hour: self.start_hour,
            start_minute: self.start_minute,
            interval_hours: self.interval_hours,
            days_completed: self.days_completed,
        })
    }
}

impl From<&Dose> for DoseDoc {
    fn from(d: &Dose) -> Self {
        DoseDoc {
            treatment_id: d.treatment_id,
            medication_name: d.medication_name.clone(),
            dosage: d.dosage.clone(),
            date: d.date.clone(),
            time: d.time.clone(),
            status: d.status,
            postpone_count: d.postpone_count,
            taken_at: d.taken_at,
        }
    }
}

impl DoseDoc {
    /// Materialize as a local dose row (id 0 until inserted).
    pub fn into_dose(self) -> Dose {
        Dose {
            id: 0,
            treatment_id: self.treatment_id,
            medication_name: self.medication_name,
            dosage: self.dosage,
            date: self.date,
            time: self.time,
            status: self.status,
            postpone_count: self.postpone_count,
            taken_at: self.taken_at,
        }
    }
}
