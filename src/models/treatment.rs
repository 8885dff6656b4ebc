use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A course of medication: start date/time, duration, and dosing cadence.
/// The id is assigned by the local store on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treatment {
    pub id: i64,
    pub medication_name: String,
    pub dosage: String,
    pub start_date: NaiveDate,
    pub duration_in_days: u32,
    pub frequency_per_day: u32,
    pub start_hour: u32,
    pub start_minute: u32,
    pub interval_hours: u32,
    pub days_completed: u32,
}

/// A treatment as entered on the registration form, before the local store
/// assigns an id.
#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentInput {
    pub medication_name: String,
    pub dosage: String,
    pub start_date: NaiveDate,
    pub duration_in_days: u32,
    pub frequency_per_day: u32,
    pub start_hour: u32,
    pub start_minute: u32,
    pub interval_hours: u32,
}

impl TreatmentInput {
    pub fn into_treatment(self, id: i64) -> Treatment {
        Treatment {
            id,
            medication_name: self.medication_name,
            dosage: self.dosage,
            start_date: self.start_date,
            duration_in_days: self.duration_in_days,
            frequency_per_day: self.frequency_per_day,
            start_hour: self.start_hour,
            start_minute: self.start_minute,
            interval_hours: self.interval_hours,
            days_completed: 0,
        }
    }
}
