use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;

use super::enums::DoseStatus;

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TIME_FMT: &str = "%H:%M";

/// One concrete scheduled instance of taking a medication.
///
/// `date` and `time` are kept as strings because they participate in the
/// cross-store identity key verbatim; parse helpers are provided where the
/// scheduler needs real timestamps. `medication_name` and `dosage` are
/// denormalized copies taken from the treatment at generation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dose {
    pub id: i64,
    pub treatment_id: i64,
    pub medication_name: String,
    pub dosage: String,
    pub date: String,
    pub time: String,
    pub status: DoseStatus,
    pub postpone_count: u32,
    pub taken_at: Option<DateTime<Utc>>,
}

impl Dose {
    /// The de-duplication identity shared by the local and remote stores.
    pub fn key(&self) -> DoseKey {
        DoseKey {
            treatment_id: self.treatment_id,
            date: self.date.clone(),
            time: self.time.clone(),
            medication_name: self.medication_name.clone(),
        }
    }

    /// Wall-clock instant this dose is due.
    pub fn fire_at(&self) -> Result<NaiveDateTime, DatabaseError> {
        let date = NaiveDate::parse_from_str(&self.date, DATE_FMT).map_err(|e| {
            DatabaseError::ConstraintViolation(format!("bad dose date {:?}: {e}", self.date))
        })?;
        let time = NaiveTime::parse_from_str(&self.time, TIME_FMT).map_err(|e| {
            DatabaseError::ConstraintViolation(format!("bad dose time {:?}: {e}", self.time))
        })?;
        Ok(date.and_time(time))
    }
}

/// Composite (treatmentId, date, time, medicationName) tuple standing in for
/// true cross-store record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DoseKey {
    pub treatment_id: i64,
    pub date: String,
    pub time: String,
    pub medication_name: String,
}

impl std::fmt::Display for DoseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.treatment_id, self.date, self.time, self.medication_name
        )
    }
}
