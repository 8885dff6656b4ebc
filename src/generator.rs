//! Dose Generator — pure expansion of a treatment into its dose occurrences.
//!
//! No persistence happens here; the reconciler decides which of the expanded
//! occurrences actually get inserted.

use chrono::Duration;

use crate::models::{Dose, DoseStatus, Treatment, DATE_FMT, TIME_FMT};

/// Expand a treatment into exactly `duration_in_days × frequency_per_day`
/// dose occurrences, in chronological generation order.
///
/// Occurrence `(day, i)` lands at the start date/time plus `day` whole days
/// plus `i × interval_hours` hours. An interval sum past midnight rolls into
/// the next calendar date by plain calendar arithmetic. Returned doses carry
/// id 0; the local store assigns real ids on insert.
pub fn expand_treatment(treatment: &Treatment) -> Vec<Dose> {
    let base = match treatment
        .start_date
        .and_hms_opt(treatment.start_hour, treatment.start_minute, 0)
    {
        Some(base) => base,
        None => {
            tracing::warn!(
                treatment_id = treatment.id,
                hour = treatment.start_hour,
                minute = treatment.start_minute,
                "invalid start time, generating no doses"
            );
            return Vec::new();
        }
    };

    let mut doses = Vec::with_capacity(
        (treatment.duration_in_days as usize) * (treatment.frequency_per_day as usize),
    );

    for day in 0..treatment.duration_in_days {
        for i in 0..treatment.frequency_per_day {
            let at = base
                + Duration::days(i64::from(day))
                + Duration::hours(i64::from(i) * i64::from(treatment.interval_hours));
            doses.push(Dose {
                id: 0,
                treatment_id: treatment.id,
                medication_name: treatment.medication_name.clone(),
                dosage: treatment.dosage.clone(),
                date: at.format(DATE_FMT).to_string(),
                time: at.format(TIME_FMT).to_string(),
                status: DoseStatus::Pending,
                postpone_count: 0,
                taken_at: None,
            });
        }
    }

    doses
}
