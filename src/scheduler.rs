//! Reminder Scheduler — one-shot timers keyed by dose id, backed by the
//! durable `reminder_schedule` table.
//!
//! The table is the source of truth: every registration and cancellation
//! writes it, and `rebuild` re-registers in-process timers from it after a
//! process restart. If the platform withholds the exact-alarm capability,
//! scheduling degrades to a logged no-op; it never errors.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db::{self, DatabaseError};
use crate::models::Dose;

/// Emitted by the timer backend when a dose's reminder comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderFired {
    pub dose_id: i64,
}

/// Platform one-shot timer surface. Registrations are keyed by dose id;
/// re-registering a key replaces the previous timer.
pub trait AlarmBackend: Send + Sync {
    /// Whether the platform granted the exact-alarm capability.
    fn exact_alarms_allowed(&self) -> bool;
    fn register(&self, dose_id: i64, fire_at: NaiveDateTime);
    fn cancel(&self, dose_id: i64);
}

/// Tokio timer backend: one sleeping task per registered dose, delivering
/// `ReminderFired` on an mpsc channel the host consumes for notification
/// presentation.
pub struct TokioAlarmBackend {
    tx: mpsc::Sender<ReminderFired>,
    tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
    allowed: bool,
}

impl TokioAlarmBackend {
    /// `allowed` reflects the platform's exact-alarm grant at startup.
    pub fn new(capacity: usize, allowed: bool) -> (Self, mpsc::Receiver<ReminderFired>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                tasks: Mutex::new(HashMap::new()),
                allowed,
            },
            rx,
        )
    }
}

impl AlarmBackend for TokioAlarmBackend {
    fn exact_alarms_allowed(&self) -> bool {
        self.allowed
    }

    fn register(&self, dose_id: i64, fire_at: NaiveDateTime) {
        let delay = (fire_at - chrono::Local::now().naive_local())
            .to_std()
            .unwrap_or_default();
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(ReminderFired { dose_id }).await.is_err() {
                tracing::warn!(dose_id, "reminder fired with no consumer");
            }
        });
        if let Some(previous) = self.tasks.lock().expect("tasks lock").insert(dose_id, handle) {
            previous.abort();
        }
    }

    fn cancel(&self, dose_id: i64) {
        if let Some(handle) = self.tasks.lock().expect("tasks lock").remove(&dose_id) {
            handle.abort();
            tracing::debug!(dose_id, "reminder timer cancelled");
        }
    }
}

/// Pairs an [`AlarmBackend`] with the durable schedule table.
pub struct ReminderScheduler<A: AlarmBackend> {
    pub(crate) backend: A,
}

impl<A: AlarmBackend> ReminderScheduler<A> {
    pub fn new(backend: A) -> Self {
        Self { backend }
    }

    /// Register a reminder for a dose. Past doses and missing exact-alarm
    /// capability both degrade to a no-op.
    pub fn schedule_dose(
        &self,
        conn: &Connection,
        dose: &Dose,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        let fire_at = dose.fire_at()?;
        if fire_at <= now {
            tracing::debug!(dose_id = dose.id, %fire_at, "dose already due, not scheduling");
            return Ok(());
        }
        if !self.backend.exact_alarms_allowed() {
            tracing::warn!(
                dose_id = dose.id,
                "exact-alarm capability not granted, reminder not scheduled"
            );
            return Ok(());
        }
        db::upsert_reminder(conn, dose.id, dose.treatment_id, fire_at)?;
        self.backend.register(dose.id, fire_at);
        tracing::debug!(dose_id = dose.id, %fire_at, "reminder scheduled");
        Ok(())
    }

    pub fn cancel_dose(&self, conn: &Connection, dose_id: i64) -> Result<(), DatabaseError> {
        db::delete_reminder(conn, dose_id)?;
        self.backend.cancel(dose_id);
        Ok(())
    }

    /// Cancel every reminder registered for a treatment (edit/delete path).
    pub fn cancel_treatment(
        &self,
        conn: &Connection,
        treatment_id: i64,
    ) -> Result<(), DatabaseError> {
        for dose_id in db::reminders_for_treatment(conn, treatment_id)? {
            self.backend.cancel(dose_id);
            db::delete_reminder(conn, dose_id)?;
        }
        Ok(())
    }

    /// Rebuild in-process timers from the durable table after a restart,
    /// pruning rows whose fire time already passed.
    pub fn rebuild(&self, conn: &Connection, now: NaiveDateTime) -> Result<usize, DatabaseError> {
        let pruned = db::prune_reminders_before(conn, now)?;
        if pruned > 0 {
            tracing::debug!(pruned, "stale reminders pruned");
        }
        if !self.backend.exact_alarms_allowed() {
            tracing::warn!("exact-alarm capability not granted, timers not rebuilt");
            return Ok(0);
        }
        let reminders = db::all_reminders(conn)?;
        for reminder in &reminders {
            self.backend.register(reminder.dose_id, reminder.fire_at);
        }
        tracing::info!(count = reminders.len(), "reminder timers rebuilt");
        Ok(reminders.len())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records registrations/cancellations instead of arming timers.
    #[derive(Default)]
    pub struct RecordingBackend {
        pub allowed: bool,
        pub registered: Mutex<Vec<(i64, NaiveDateTime)>>,
        pub cancelled: Mutex<Vec<i64>>,
    }

    impl RecordingBackend {
        pub fn allowed() -> Self {
            Self {
                allowed: true,
                ..Self::default()
            }
        }

        pub fn denied() -> Self {
            Self::default()
        }

        pub fn registered_ids(&self) -> Vec<i64> {
            self.registered
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| *id)
                .collect()
        }
    }

    impl AlarmBackend for RecordingBackend {
        fn exact_alarms_allowed(&self) -> bool {
            self.allowed
        }

        fn register(&self, dose_id: i64, fire_at: NaiveDateTime) {
            self.registered.lock().unwrap().push((dose_id, fire_at));
        }

        fn cancel(&self, dose_id: i64) {
            self.cancelled.lock().unwrap().push(dose_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingBackend;
    use super::*;
    use crate::db::open_memory_database;
    use crate::models::DoseStatus;
    use chrono::NaiveDate;

    fn dose(id: i64, treatment_id: i64, date: &str, time: &str) -> Dose {
        Dose {
            id,
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

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn schedules_future_doses_durably() {
        let conn = open_memory_database().unwrap();
        let scheduler = ReminderScheduler::new(RecordingBackend::allowed());
        scheduler
            .schedule_dose(&conn, &dose(1, 10, "2024-01-02", "08:00"), at(1, 12))
            .unwrap();
        assert_eq!(scheduler.backend.registered_ids(), vec![1]);
        assert_eq!(db::all_reminders(&conn).unwrap().len(), 1);
    }

    #[test]
    fn past_dose_is_skipped() {
        let conn = open_memory_database().unwrap();
        let scheduler = ReminderScheduler::new(RecordingBackend::allowed());
        scheduler
            .schedule_dose(&conn, &dose(1, 10, "2024-01-01", "08:00"), at(1, 12))
            .unwrap();
        assert!(scheduler.backend.registered_ids().is_empty());
        assert!(db::all_reminders(&conn).unwrap().is_empty());
    }

    #[test]
    fn missing_capability_is_a_noop_not_an_error() {
        let conn = open_memory_database().unwrap();
        let scheduler = ReminderScheduler::new(RecordingBackend::denied());
        let result = scheduler.schedule_dose(&conn, &dose(1, 10, "2024-01-02", "08:00"), at(1, 12));
        assert!(result.is_ok());
        assert!(scheduler.backend.registered_ids().is_empty());
        assert!(db::all_reminders(&conn).unwrap().is_empty());
    }

    #[test]
    fn cancel_treatment_clears_all_its_timers() {
        let conn = open_memory_database().unwrap();
        let scheduler = ReminderScheduler::new(RecordingBackend::allowed());
        scheduler
            .schedule_dose(&conn, &dose(1, 10, "2024-01-02", "08:00"), at(1, 0))
            .unwrap();
        scheduler
            .schedule_dose(&conn, &dose(2, 10, "2024-01-02", "20:00"), at(1, 0))
            .unwrap();
        scheduler
            .schedule_dose(&conn, &dose(3, 11, "2024-01-02", "09:00"), at(1, 0))
            .unwrap();

        scheduler.cancel_treatment(&conn, 10).unwrap();
        assert_eq!(*scheduler.backend.cancelled.lock().unwrap(), vec![1, 2]);
        let remaining = db::all_reminders(&conn).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].dose_id, 3);
    }

    #[test]
    fn rebuild_registers_only_future_rows() {
        let conn = open_memory_database().unwrap();
        db::upsert_reminder(&conn, 1, 10, at(1, 8)).unwrap();
        db::upsert_reminder(&conn, 2, 10, at(3, 8)).unwrap();

        let scheduler = ReminderScheduler::new(RecordingBackend::allowed());
        let rebuilt = scheduler.rebuild(&conn, at(2, 0)).unwrap();
        assert_eq!(rebuilt, 1);
        assert_eq!(scheduler.backend.registered_ids(), vec![2]);
        assert_eq!(db::all_reminders(&conn).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tokio_backend_fires_due_reminder() {
        let (backend, mut rx) = TokioAlarmBackend::new(4, true);
        // Already-due fire time: delay clamps to zero and fires immediately.
        backend.register(7, chrono::Local::now().naive_local());
        let fired = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(fired, ReminderFired { dose_id: 7 });
    }

    #[tokio::test]
    async fn tokio_backend_cancel_prevents_fire() {
        let (backend, mut rx) = TokioAlarmBackend::new(4, true);
        backend.register(7, chrono::Local::now().naive_local() + chrono::Duration::milliseconds(50));
        backend.cancel(7);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(waited.is_err(), "cancelled reminder still fired");
    }
}
