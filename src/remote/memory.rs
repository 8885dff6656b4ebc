//! In-memory remote store double: the offline default and the test harness
//! for reconciliation and outbox behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{DoseDoc, RemoteError, RemoteStore, TreatmentDoc};

#[derive(Default)]
pub struct InMemoryRemoteStore {
    treatments: Mutex<HashMap<(String, String), TreatmentDoc>>,
    doses: Mutex<HashMap<(String, String), DoseDoc>>,
    offline: AtomicBool,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until restored (simulated outage).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    pub fn treatment_count(&self, user_id: &str) -> usize {
        self.treatments
            .lock()
            .expect("treatments lock")
            .keys()
            .filter(|(u, _)| u == user_id)
            .count()
    }

    pub fn dose_count(&self, user_id: &str) -> usize {
        self.doses
            .lock()
            .expect("doses lock")
            .keys()
            .filter(|(u, _)| u == user_id)
            .count()
    }

    pub fn get_dose(&self, user_id: &str, doc_id: &str) -> Option<DoseDoc> {
        self.doses
            .lock()
            .expect("doses lock")
            .get(&(user_id.to_string(), doc_id.to_string()))
            .cloned()
    }

    /// Seed a document directly, bypassing the store API (test setup).
    pub fn seed_dose(&self, user_id: &str, doc_id: &str, doc: DoseDoc) {
        self.doses
            .lock()
            .expect("doses lock")
            .insert((user_id.to_string(), doc_id.to_string()), doc);
    }

    pub fn seed_treatment(&self, user_id: &str, doc_id: &str, doc: TreatmentDoc) {
        self.treatments
            .lock()
            .expect("treatments lock")
            .insert((user_id.to_string(), doc_id.to_string()), doc);
    }
}

impl RemoteStore for InMemoryRemoteStore {
    async fn put_treatment(
        &self,
        user_id: &str,
        doc_id: &str,
        doc: &TreatmentDoc,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        self.treatments
            .lock()
            .expect("treatments lock")
            .insert((user_id.to_string(), doc_id.to_string()), doc.clone());
        Ok(())
    }

    async fn delete_treatment(&self, user_id: &str, doc_id: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        self.treatments
            .lock()
            .expect("treatments lock")
            .remove(&(user_id.to_string(), doc_id.to_string()));
        Ok(())
    }

    async fn fetch_treatments(&self, user_id: &str) -> Result<Vec<TreatmentDoc>, RemoteError> {
        self.check_online()?;
        Ok(self
            .treatments
            .lock()
            .expect("treatments lock")
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn put_dose(
        &self,
        user_id: &str,
        doc_id: &str,
        doc: &DoseDoc,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        self.doses
            .lock()
            .expect("doses lock")
            .insert((user_id.to_string(), doc_id.to_string()), doc.clone());
        Ok(())
    }

    async fn delete_dose(&self, user_id: &str, doc_id: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        self.doses
            .lock()
            .expect("doses lock")
            .remove(&(user_id.to_string(), doc_id.to_string()));
        Ok(())
    }

    async fn fetch_doses(&self, user_id: &str) -> Result<Vec<DoseDoc>, RemoteError> {
        self.check_online()?;
        Ok(self
            .doses
            .lock()
            .expect("doses lock")
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DoseStatus;

    fn doc() -> DoseDoc {
        DoseDoc {
            treatment_id: 1,
            medication_name: "Paracetamol".into(),
            dosage: "500mg".into(),
            date: "2024-01-01".into(),
            time: "08:00".into(),
            status: DoseStatus::Pending,
            postpone_count: 0,
            taken_at: None,
        }
    }

    #[tokio::test]
    async fn put_fetch_delete_scoped_by_user() {
        let store = InMemoryRemoteStore::new();
        store.put_dose("alice", "d1", &doc()).await.unwrap();
        store.put_dose("bob", "d1", &doc()).await.unwrap();

        assert_eq!(store.fetch_doses("alice").await.unwrap().len(), 1);
        store.delete_dose("alice", "d1").await.unwrap();
        assert!(store.fetch_doses("alice").await.unwrap().is_empty());
        assert_eq!(store.fetch_doses("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_mode_fails_every_call() {
        let store = InMemoryRemoteStore::new();
        store.set_offline(true);
        assert!(store.put_dose("alice", "d1", &doc()).await.is_err());
        assert!(store.fetch_treatments("alice").await.is_err());
        store.set_offline(false);
        assert!(store.put_dose("alice", "d1", &doc()).await.is_ok());
    }
}
