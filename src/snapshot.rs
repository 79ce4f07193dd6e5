//! Snapshot Manager
//!
//! Captures the full pre-deletion state of a primary record and every record
//! referencing it, keyed by collection, under a collision-resistant id with a
//! fixed retention window. Capture is read-only against user collections and
//! safely retryable; a snapshot is consumed at most once by the rollback
//! engine.

use crate::config::SnapshotConfig;
use crate::error::{CoreResult, DeletionError};
use crate::registry::RelationshipRegistry;
use crate::store::{doc_id, DocumentStore, FieldRef, Patch, Predicate};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Point-in-time copy of everything a deletion will touch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionSnapshot {
    pub id: Uuid,
    pub primary_record_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_by: Uuid,
    /// Collection name -> full record copies (primary included under its own
    /// collection)
    pub captured: HashMap<String, Vec<Value>>,
    pub used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<Uuid>,
}

impl DeletionSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Total records captured across all collections
    pub fn record_count(&self) -> usize {
        self.captured.values().map(Vec::len).sum()
    }
}

/// Creates, loads and consumes deletion snapshots
pub struct SnapshotManager {
    store: Arc<dyn DocumentStore>,
    registry: Arc<RelationshipRegistry>,
    config: SnapshotConfig,
}

impl SnapshotManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<RelationshipRegistry>,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Capture the primary record and every referencing record into a new
    /// persisted snapshot
    pub async fn capture(
        &self,
        primary_id: &str,
        operator_id: Uuid,
    ) -> CoreResult<DeletionSnapshot> {
        let primary = self
            .store
            .find_one(
                &self.registry.primary_collection,
                &Predicate::IdEq(primary_id.to_string()),
            )
            .await
            .map_err(|e| DeletionError::Snapshot(e.to_string()))?
            .ok_or_else(|| {
                DeletionError::NotFound(format!(
                    "primary record '{}' in '{}'",
                    primary_id, self.registry.primary_collection
                ))
            })?;

        let mut captured: HashMap<String, Vec<Value>> = HashMap::new();
        captured.insert(self.registry.primary_collection.clone(), vec![primary]);

        // Two rules may point at the same collection; capture each record once
        let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
        for rule in self.registry.rules() {
            let matching = self
                .store
                .find(
                    &rule.referencing_collection,
                    &Predicate::FieldEq(rule.field.clone(), json!(primary_id)),
                )
                .await
                .map_err(|e| DeletionError::Snapshot(e.to_string()))?;

            let seen_ids = seen.entry(rule.referencing_collection.clone()).or_default();
            let bucket = captured
                .entry(rule.referencing_collection.clone())
                .or_default();
            for record in matching {
                match doc_id(&record) {
                    Some(id) if seen_ids.contains(id) => continue,
                    Some(id) => {
                        seen_ids.insert(id.to_string());
                        bucket.push(record);
                    }
                    None => bucket.push(record),
                }
            }
        }

        let created_at = Utc::now();
        let snapshot = DeletionSnapshot {
            id: Uuid::new_v4(),
            primary_record_id: primary_id.to_string(),
            created_at,
            expires_at: created_at + Duration::days(self.config.retention_days),
            created_by: operator_id,
            captured,
            used: false,
            used_at: None,
            used_by: None,
        };

        let document = serde_json::to_value(&snapshot)
            .map_err(|e| DeletionError::Snapshot(e.to_string()))?;
        self.store
            .insert(&self.config.collection, document)
            .await
            .map_err(|e| DeletionError::Snapshot(e.to_string()))?;

        info!(
            snapshot_id = %snapshot.id,
            primary_id,
            records = snapshot.record_count(),
            "Captured deletion snapshot"
        );
        Ok(snapshot)
    }

    /// Load a snapshot by id
    pub async fn get(&self, snapshot_id: Uuid) -> CoreResult<Option<DeletionSnapshot>> {
        let document = self
            .store
            .find_one(
                &self.config.collection,
                &Predicate::IdEq(snapshot_id.to_string()),
            )
            .await?;
        match document {
            Some(document) => serde_json::from_value(document)
                .map(Some)
                .map_err(|e| DeletionError::Snapshot(e.to_string())),
            None => Ok(None),
        }
    }

    /// List snapshots for one primary record, newest first
    pub async fn list(&self, primary_id: &str) -> CoreResult<Vec<DeletionSnapshot>> {
        let documents = self
            .store
            .find(
                &self.config.collection,
                &Predicate::FieldEq(FieldRef::scalar("primaryRecordId"), json!(primary_id)),
            )
            .await?;
        let mut snapshots = documents
            .into_iter()
            .map(|document| {
                serde_json::from_value(document).map_err(|e| DeletionError::Snapshot(e.to_string()))
            })
            .collect::<CoreResult<Vec<DeletionSnapshot>>>()?;
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    /// Atomically consume a snapshot: flips `used` from false to true in a
    /// single conditional update, so two racing rollbacks cannot both claim
    /// it. Returns whether this caller won the claim.
    pub async fn claim(&self, snapshot_id: Uuid, operator_id: Uuid) -> CoreResult<bool> {
        let unused = Predicate::And(vec![
            Predicate::IdEq(snapshot_id.to_string()),
            Predicate::FieldEq(FieldRef::scalar("used"), json!(false)),
        ]);
        let claimed = self
            .store
            .update_many(&self.config.collection, &unused, &Patch::set("used", json!(true)))
            .await?
            == 1;

        if claimed {
            // Consumption metadata; not part of the guarded flip
            let by_id = Predicate::IdEq(snapshot_id.to_string());
            self.store
                .update_many(
                    &self.config.collection,
                    &by_id,
                    &Patch::set("usedAt", json!(Utc::now().to_rfc3339())),
                )
                .await?;
            self.store
                .update_many(
                    &self.config.collection,
                    &by_id,
                    &Patch::set("usedBy", json!(operator_id)),
                )
                .await?;
        }
        Ok(claimed)
    }

    /// Delete snapshots past their retention window; returns how many went
    pub async fn prune_expired(&self) -> CoreResult<usize> {
        let now = Utc::now();
        let documents = self
            .store
            .find(&self.config.collection, &Predicate::All)
            .await?;

        let mut removed = 0;
        for document in documents {
            let expired = document
                .get("expiresAt")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|expires| now > expires.with_timezone(&Utc))
                .unwrap_or(false);
            if expired {
                if let Some(id) = doc_id(&document) {
                    removed += self
                        .store
                        .delete_many(&self.config.collection, &Predicate::IdEq(id.to_string()))
                        .await? as usize;
                }
            }
        }

        if removed > 0 {
            info!(removed, "Pruned expired deletion snapshots");
        }
        Ok(removed)
    }
}
