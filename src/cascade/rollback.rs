//! Rollback Engine
//!
//! Restores every record captured in a deletion snapshot. Restoration is
//! best-effort recovery, not a new invariant-preserving transition: records
//! restore independently, conflicts with data created after the deletion are
//! counted, and individual failures never abort the rest.

use crate::cascade::{OperationKind, RollbackOptions};
use crate::error::{CoreResult, DeletionError};
use crate::snapshot::SnapshotManager;
use crate::store::{doc_id, DocumentStore, Patch, Predicate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Final status of a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollbackStatus {
    Success,
    Partial,
}

/// A record skipped because newer data was preserved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreConflict {
    pub collection: String,
    pub record_id: String,
}

/// A record that could not be restored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreFailure {
    pub collection: String,
    pub record_id: String,
    pub error: String,
}

/// Outcome of a rollback run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub snapshot_id: Uuid,
    pub primary_record_id: String,
    pub restored: u64,
    pub conflicts: Vec<RestoreConflict>,
    pub failures: Vec<RestoreFailure>,
    pub status: RollbackStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RollbackResult {
    /// Error view of a partial outcome, for callers that treat any
    /// unrestored record as a failure
    pub fn require_complete(&self) -> CoreResult<()> {
        match self.status {
            RollbackStatus::Success => Ok(()),
            RollbackStatus::Partial => Err(DeletionError::PartialRestore {
                conflicts: self.conflicts.len(),
                failures: self.failures.len(),
            }),
        }
    }
}

/// Replays a deletion snapshot back into the store
pub struct RollbackEngine {
    store: Arc<dyn DocumentStore>,
    snapshots: Arc<SnapshotManager>,
}

impl RollbackEngine {
    pub fn new(store: Arc<dyn DocumentStore>, snapshots: Arc<SnapshotManager>) -> Self {
        Self { store, snapshots }
    }

    /// Restore every captured record from the snapshot. Fails, in order, with
    /// `SnapshotNotFound`, `SnapshotExpired`, `SnapshotAlreadyUsed`; the
    /// expiry check performs no writes.
    pub async fn rollback(
        &self,
        snapshot_id: Uuid,
        options: &RollbackOptions,
        operator_id: Uuid,
    ) -> CoreResult<RollbackResult> {
        let started_at = Utc::now();
        let operation_id = Uuid::new_v4();

        let snapshot = self
            .snapshots
            .get(snapshot_id)
            .await?
            .ok_or(DeletionError::SnapshotNotFound(snapshot_id))?;
        if snapshot.is_expired(started_at) {
            return Err(DeletionError::SnapshotExpired(snapshot_id));
        }
        if snapshot.used {
            return Err(DeletionError::SnapshotAlreadyUsed(snapshot_id));
        }
        // Single conditional flip closes the race between two rollbacks that
        // both read `used == false` above
        if !self.snapshots.claim(snapshot_id, operator_id).await? {
            return Err(DeletionError::SnapshotAlreadyUsed(snapshot_id));
        }

        info!(
            %snapshot_id,
            primary_id = %snapshot.primary_record_id,
            records = snapshot.record_count(),
            preserve_new_data = options.preserve_new_data,
            "Starting rollback"
        );

        let mut restored = 0u64;
        let mut conflicts = Vec::new();
        let mut failures = Vec::new();

        for (collection, records) in &snapshot.captured {
            for record in records {
                let record_id = match doc_id(record) {
                    Some(id) => id.to_string(),
                    None => {
                        failures.push(RestoreFailure {
                            collection: collection.clone(),
                            record_id: String::new(),
                            error: "captured record has no id".to_string(),
                        });
                        continue;
                    }
                };
                match self
                    .restore_record(collection, &record_id, record, options)
                    .await
                {
                    Ok(RestoreOutcome::Restored) => restored += 1,
                    Ok(RestoreOutcome::Conflict) => conflicts.push(RestoreConflict {
                        collection: collection.clone(),
                        record_id,
                    }),
                    Err(e) => {
                        warn!(collection, record_id, error = %e, "Record could not be restored");
                        failures.push(RestoreFailure {
                            collection: collection.clone(),
                            record_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let status = if conflicts.is_empty() && failures.is_empty() {
            RollbackStatus::Success
        } else {
            RollbackStatus::Partial
        };
        info!(
            %snapshot_id,
            restored,
            conflicts = conflicts.len(),
            failures = failures.len(),
            "Rollback finished"
        );

        Ok(RollbackResult {
            operation_id,
            kind: OperationKind::Rollback,
            snapshot_id,
            primary_record_id: snapshot.primary_record_id.clone(),
            restored,
            conflicts,
            failures,
            status,
            started_at,
            completed_at: Utc::now(),
        })
    }

    async fn restore_record(
        &self,
        collection: &str,
        record_id: &str,
        captured: &serde_json::Value,
        options: &RollbackOptions,
    ) -> CoreResult<RestoreOutcome> {
        let predicate = Predicate::IdEq(record_id.to_string());
        let existing = self.store.find_one(collection, &predicate).await?;
        match existing {
            None => {
                self.store.insert(collection, captured.clone()).await?;
                Ok(RestoreOutcome::Restored)
            }
            Some(_) if options.preserve_new_data => Ok(RestoreOutcome::Conflict),
            Some(_) => {
                self.store
                    .update_many(collection, &predicate, &Patch::Replace(captured.clone()))
                    .await?;
                Ok(RestoreOutcome::Restored)
            }
        }
    }
}

enum RestoreOutcome {
    Restored,
    Conflict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotConfig;
    use crate::registry::RelationshipRegistry;
    use crate::store::{CollectionOps, MemoryStore};
    use serde_json::json;

    fn fixtures(store: Arc<MemoryStore>) -> (Arc<SnapshotManager>, RollbackEngine) {
        let registry = Arc::new(
            RelationshipRegistry::builder("persons")
                .cascade("notes", "personId")
                .build()
                .unwrap(),
        );
        let snapshots = Arc::new(SnapshotManager::new(
            Arc::clone(&store) as Arc<dyn crate::store::DocumentStore>,
            registry,
            SnapshotConfig::default(),
        ));
        let engine = RollbackEngine::new(store, Arc::clone(&snapshots));
        (snapshots, engine)
    }

    #[tokio::test]
    async fn test_unknown_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let (_, engine) = fixtures(store);
        let err = engine
            .rollback(Uuid::new_v4(), &RollbackOptions::default(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SNAPSHOT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_restores_deleted_records() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("persons", json!({"id": "P", "name": "Ada"}))
            .await
            .unwrap();
        store
            .insert("notes", json!({"id": "n1", "personId": "P"}))
            .await
            .unwrap();
        let (snapshots, engine) = fixtures(Arc::clone(&store));

        let operator = Uuid::new_v4();
        let snapshot = snapshots.capture("P", operator).await.unwrap();

        // Simulate the deletion
        store
            .delete_many("notes", &Predicate::All)
            .await
            .unwrap();
        store
            .delete_many("persons", &Predicate::All)
            .await
            .unwrap();

        let result = engine
            .rollback(snapshot.id, &RollbackOptions::default(), operator)
            .await
            .unwrap();
        assert_eq!(result.status, RollbackStatus::Success);
        assert_eq!(result.restored, 2);
        result.require_complete().unwrap();

        let person = store
            .find_one("persons", &Predicate::IdEq("P".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(person["name"], json!("Ada"));
    }

    #[tokio::test]
    async fn test_preserve_new_data_counts_conflicts() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("persons", json!({"id": "P", "name": "Ada"}))
            .await
            .unwrap();
        let (snapshots, engine) = fixtures(Arc::clone(&store));

        let operator = Uuid::new_v4();
        let snapshot = snapshots.capture("P", operator).await.unwrap();

        // A record with the same id was written after the deletion
        store
            .update_many(
                "persons",
                &Predicate::IdEq("P".to_string()),
                &Patch::set("name", json!("Someone new")),
            )
            .await
            .unwrap();

        let result = engine
            .rollback(
                snapshot.id,
                &RollbackOptions {
                    preserve_new_data: true,
                },
                operator,
            )
            .await
            .unwrap();
        assert_eq!(result.status, RollbackStatus::Partial);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(
            result.require_complete().unwrap_err().code(),
            "PARTIAL_RESTORE"
        );

        let person = store
            .find_one("persons", &Predicate::IdEq("P".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(person["name"], json!("Someone new"));
    }

    #[tokio::test]
    async fn test_second_rollback_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("persons", json!({"id": "P"}))
            .await
            .unwrap();
        let (snapshots, engine) = fixtures(Arc::clone(&store));

        let operator = Uuid::new_v4();
        let snapshot = snapshots.capture("P", operator).await.unwrap();

        engine
            .rollback(snapshot.id, &RollbackOptions::default(), operator)
            .await
            .unwrap();
        let err = engine
            .rollback(snapshot.id, &RollbackOptions::default(), operator)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SNAPSHOT_ALREADY_USED");
    }

    #[tokio::test]
    async fn test_expired_snapshot_performs_no_writes() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("persons", json!({"id": "P", "name": "Ada"}))
            .await
            .unwrap();
        let (snapshots, engine) = fixtures(Arc::clone(&store));

        let operator = Uuid::new_v4();
        let snapshot = snapshots.capture("P", operator).await.unwrap();
        store
            .update_many(
                "deletion_snapshots",
                &Predicate::IdEq(snapshot.id.to_string()),
                &Patch::set(
                    "expiresAt",
                    json!((Utc::now() - chrono::Duration::days(1)).to_rfc3339()),
                ),
            )
            .await
            .unwrap();
        store
            .delete_many("persons", &Predicate::All)
            .await
            .unwrap();

        let err = engine
            .rollback(snapshot.id, &RollbackOptions::default(), operator)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SNAPSHOT_EXPIRED");

        // Nothing was restored and the snapshot was not consumed
        assert!(store
            .find_one("persons", &Predicate::IdEq("P".to_string()))
            .await
            .unwrap()
            .is_none());
        let loaded = snapshots.get(snapshot.id).await.unwrap().unwrap();
        assert!(!loaded.used);
    }
}
