//! Outbox worker — drains pending remote writes with bounded retries.
//!
//! Local writes stay authoritative: a remote failure is logged and retried on
//! the next tick, and an entry that keeps failing is eventually dropped. That
//! makes divergence between the stores possible and accepted, but never
//! user-visible.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::oneshot;

use crate::config;
use crate::db::{self, OutboxEntry};
use crate::models::{EntityKind, OutboxOp};
use crate::reconcile::ReconcileError;
use crate::remote::{DoseDoc, RemoteError, RemoteStore, TreatmentDoc};

const DRAIN_BATCH: u32 = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub delivered: usize,
    pub failed: usize,
    pub dropped: usize,
}

pub struct OutboxWorker<R: RemoteStore> {
    db: Arc<Mutex<Connection>>,
    remote: Arc<R>,
    user_id: String,
}

impl<R: RemoteStore> OutboxWorker<R> {
    pub fn new(db: Arc<Mutex<Connection>>, remote: Arc<R>, user_id: &str) -> Self {
        Self {
            db,
            remote,
            user_id: user_id.to_string(),
        }
    }

    /// Drain until the shutdown channel fires.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(config::OUTBOX_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.drain_once().await {
                        Ok(stats) if stats != DrainStats::default() => {
                            tracing::debug!(?stats, "outbox drained");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "outbox drain failed"),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("outbox worker stopped");
                    return;
                }
            }
        }
    }

    /// One drain pass over the oldest pending entries.
    pub async fn drain_once(&self) -> Result<DrainStats, ReconcileError> {
        let pending = {
            let conn = self.db.lock().expect("db lock");
            db::pending_outbox(&conn, DRAIN_BATCH)?
        };

        let mut stats = DrainStats::default();
        for entry in pending {
            let outcome = self.deliver(&entry).await;
            let conn = self.db.lock().expect("db lock");
            match outcome {
                Ok(()) => {
                    db::delete_outbox_entry(&conn, entry.id)?;
                    stats.delivered += 1;
                }
                Err(e) => {
                    if entry.attempts + 1 >= config::OUTBOX_MAX_ATTEMPTS {
                        tracing::error!(
                            entry_id = entry.id,
                            remote_id = %entry.remote_id,
                            error = %e,
                            "outbox entry dropped after repeated failures"
                        );
                        db::delete_outbox_entry(&conn, entry.id)?;
                        stats.dropped += 1;
                    } else {
                        tracing::warn!(
                            entry_id = entry.id,
                            remote_id = %entry.remote_id,
                            attempts = entry.attempts + 1,
                            error = %e,
                            "remote write failed, will retry"
                        );
                        db::mark_outbox_failure(&conn, entry.id, &e.to_string())?;
                        stats.failed += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), RemoteError> {
        match (entry.entity_type, entry.op) {
            (EntityKind::Treatment, OutboxOp::Upsert) => {
                let doc: TreatmentDoc = parse_payload(entry)?;
                self.remote
                    .put_treatment(&self.user_id, &entry.remote_id, &doc)
                    .await
            }
            (EntityKind::Treatment, OutboxOp::Delete) => {
                self.remote
                    .delete_treatment(&self.user_id, &entry.remote_id)
                    .await
            }
            (EntityKind::Dose, OutboxOp::Upsert) => {
                let doc: DoseDoc = parse_payload(entry)?;
                self.remote
                    .put_dose(&self.user_id, &entry.remote_id, &doc)
                    .await
            }
            (EntityKind::Dose, OutboxOp::Delete) => {
                self.remote.delete_dose(&self.user_id, &entry.remote_id).await
            }
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(entry: &OutboxEntry) -> Result<T, RemoteError> {
    let raw = entry
        .payload
        .as_deref()
        .ok_or_else(|| RemoteError::MalformedDocument {
            doc_id: entry.remote_id.clone(),
            reason: "upsert entry without payload".into(),
        })?;
    serde_json::from_str(raw).map_err(|e| RemoteError::MalformedDocument {
        doc_id: entry.remote_id.clone(),
        reason: e.to_string(),
    })
}
