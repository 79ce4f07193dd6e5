//! Cascade Executor
//!
//! Applies the registry's policies against every referencing collection and
//! then removes or deactivates the primary record, all inside one atomic
//! store session. No observer can see a state where only some rules have
//! applied while the primary is already gone, or vice versa.

use crate::cascade::rollback::RollbackEngine;
use crate::cascade::{
    apply_rule, AppliedAction, CollectionOutcome, DeletionOptions, OperationKind, OperationResult,
    RollbackOptions,
};
use crate::config::CascadeConfig;
use crate::error::{CoreResult, DeletionError};
use crate::registry::{ReferencePolicy, RelationshipRegistry};
use crate::snapshot::SnapshotManager;
use crate::store::{CollectionOps, DocumentStore, Patch, Predicate, StoreSession};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Runs deletions as single atomic units
pub struct CascadeExecutor {
    store: Arc<dyn DocumentStore>,
    registry: Arc<RelationshipRegistry>,
    snapshots: Arc<SnapshotManager>,
    rollback: Arc<RollbackEngine>,
    config: CascadeConfig,
}

impl CascadeExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<RelationshipRegistry>,
        snapshots: Arc<SnapshotManager>,
        rollback: Arc<RollbackEngine>,
        config: CascadeConfig,
    ) -> Self {
        Self {
            store,
            registry,
            snapshots,
            rollback,
            config,
        }
    }

    /// Delete a primary record and bring every referencing collection into a
    /// consistent state, per the registry's policies
    pub async fn execute(
        &self,
        primary_id: &str,
        options: &DeletionOptions,
        operator_id: Uuid,
    ) -> CoreResult<OperationResult> {
        let started_at = Utc::now();
        let operation_id = Uuid::new_v4();

        let primary = self
            .store
            .find_one(
                &self.registry.primary_collection,
                &Predicate::IdEq(primary_id.to_string()),
            )
            .await?
            .ok_or_else(|| {
                DeletionError::NotFound(format!(
                    "primary record '{}' in '{}'",
                    primary_id, self.registry.primary_collection
                ))
            })?;
        if !is_active(&primary) {
            return Err(DeletionError::AlreadyInactive(primary_id.to_string()));
        }

        if options.dry_run {
            return self
                .dry_run(primary_id, options, operation_id, started_at)
                .await;
        }

        let snapshot_id = if options.create_snapshot {
            Some(self.snapshots.capture(primary_id, operator_id).await?.id)
        } else {
            None
        };

        info!(
            %operation_id,
            primary_id,
            hard_delete = options.hard_delete,
            snapshot = ?snapshot_id,
            "Starting cascade execution"
        );

        let session = self.store.begin().await.map_err(|e| {
            DeletionError::Transaction {
                message: e.to_string(),
                snapshot_id,
            }
        })?;

        match self
            .run_in_session(session.as_ref(), primary_id, options, operator_id)
            .await
        {
            Ok(collections) => {
                session
                    .commit()
                    .await
                    .map_err(|e| DeletionError::Transaction {
                        message: format!("commit failed: {}", e),
                        snapshot_id,
                    })?;
                info!(%operation_id, primary_id, "Cascade committed");
                Ok(OperationResult {
                    operation_id,
                    kind: OperationKind::Execute,
                    target_entity_id: primary_id.to_string(),
                    collections,
                    warnings: Vec::new(),
                    started_at,
                    completed_at: Utc::now(),
                    snapshot_id,
                    dry_run: false,
                })
            }
            Err(failure) => {
                if let Err(abort_err) = session.abort().await {
                    warn!(%operation_id, error = %abort_err, "Session abort reported an error");
                }
                error!(%operation_id, primary_id, error = %failure, "Cascade aborted; no changes were committed");
                match failure {
                    // Domain failures caught by the in-session re-check wrote
                    // nothing; the snapshot must not be replayed over another
                    // operation's committed state
                    DeletionError::AlreadyInactive(id) => {
                        Err(DeletionError::AlreadyInactive(id))
                    }
                    DeletionError::NotFound(what) => Err(DeletionError::NotFound(what)),
                    other => {
                        self.emergency_rollback(snapshot_id, operator_id).await;
                        Err(DeletionError::Transaction {
                            message: other.to_string(),
                            snapshot_id,
                        })
                    }
                }
            }
        }
    }

    /// All mutation happens here, inside the open session
    async fn run_in_session(
        &self,
        session: &dyn StoreSession,
        primary_id: &str,
        options: &DeletionOptions,
        operator_id: Uuid,
    ) -> CoreResult<HashMap<String, CollectionOutcome>> {
        // Re-check the primary under isolation: two concurrent executes on
        // one id must resolve to one winner and one domain-level failure
        let primary = session
            .find_one(
                &self.registry.primary_collection,
                &Predicate::IdEq(primary_id.to_string()),
            )
            .await?
            .ok_or_else(|| DeletionError::NotFound(format!("primary record '{}'", primary_id)))?;
        if !is_active(&primary) {
            return Err(DeletionError::AlreadyInactive(primary_id.to_string()));
        }

        let mut collections: HashMap<String, CollectionOutcome> = HashMap::new();
        for rule in self.registry.rules() {
            let preserve = rule.policy == ReferencePolicy::Preserve
                && options
                    .preserve_collections
                    .contains(&rule.referencing_collection);
            let (action, count) =
                apply_rule(session as &dyn CollectionOps, rule, primary_id, preserve, operator_id)
                    .await?;
            merge_outcome(
                &mut collections,
                &rule.referencing_collection,
                action,
                count,
            );
        }

        let primary_predicate = Predicate::IdEq(primary_id.to_string());
        if options.hard_delete {
            let removed = session
                .delete_many(&self.registry.primary_collection, &primary_predicate)
                .await?;
            merge_outcome(
                &mut collections,
                &self.registry.primary_collection,
                AppliedAction::Deleted,
                removed,
            );
        } else {
            session
                .update_many(
                    &self.registry.primary_collection,
                    &primary_predicate,
                    &Patch::set("active", json!(false)),
                )
                .await?;
            session
                .update_many(
                    &self.registry.primary_collection,
                    &primary_predicate,
                    &Patch::set("deactivatedAt", json!(Utc::now().to_rfc3339())),
                )
                .await?;
            session
                .update_many(
                    &self.registry.primary_collection,
                    &primary_predicate,
                    &Patch::set("deactivatedBy", json!(operator_id)),
                )
                .await?;
            merge_outcome(
                &mut collections,
                &self.registry.primary_collection,
                AppliedAction::Deactivated,
                1,
            );
        }

        Ok(collections)
    }

    /// Counts-only pass; never opens a session, never writes
    async fn dry_run(
        &self,
        primary_id: &str,
        options: &DeletionOptions,
        operation_id: Uuid,
        started_at: chrono::DateTime<Utc>,
    ) -> CoreResult<OperationResult> {
        let mut collections: HashMap<String, CollectionOutcome> = HashMap::new();
        for rule in self.registry.rules() {
            let matched = self
                .store
                .count(
                    &rule.referencing_collection,
                    &Predicate::FieldEq(rule.field.clone(), json!(primary_id)),
                )
                .await?;
            let action = match rule.policy {
                ReferencePolicy::Cascade => AppliedAction::Deleted,
                ReferencePolicy::Preserve
                    if options
                        .preserve_collections
                        .contains(&rule.referencing_collection) =>
                {
                    AppliedAction::Redacted
                }
                ReferencePolicy::Preserve => AppliedAction::Deleted,
                ReferencePolicy::Cleanup => AppliedAction::Cleaned,
            };
            merge_outcome(&mut collections, &rule.referencing_collection, action, matched);
        }
        merge_outcome(
            &mut collections,
            &self.registry.primary_collection,
            if options.hard_delete {
                AppliedAction::Deleted
            } else {
                AppliedAction::Deactivated
            },
            1,
        );

        Ok(OperationResult {
            operation_id,
            kind: OperationKind::Execute,
            target_entity_id: primary_id.to_string(),
            collections,
            warnings: vec!["dry run: no changes were applied".to_string()],
            started_at,
            completed_at: Utc::now(),
            snapshot_id: None,
            dry_run: true,
        })
    }

    /// Best-effort recovery after an aborted unit. Its own failure is logged,
    /// never re-raised; the store already rolled the unit back, this only
    /// matters for engines whose abort guarantees are weaker.
    async fn emergency_rollback(&self, snapshot_id: Option<Uuid>, operator_id: Uuid) {
        if !self.config.emergency_rollback {
            return;
        }
        let Some(snapshot_id) = snapshot_id else {
            return;
        };
        warn!(%snapshot_id, "Attempting emergency rollback after aborted cascade");
        match self
            .rollback
            .rollback(snapshot_id, &RollbackOptions::default(), operator_id)
            .await
        {
            Ok(result) => {
                if let Err(e) = result.require_complete() {
                    warn!(%snapshot_id, error = %e, "Emergency rollback restored only part of the snapshot");
                }
            }
            Err(e) => {
                error!(%snapshot_id, error = %e, "Emergency rollback failed; snapshot remains available for manual recovery");
            }
        }
    }
}

/// A primary without an `active` field counts as active; only the executor
/// ever writes the flag
pub(crate) fn is_active(document: &Value) -> bool {
    document.get("active") != Some(&Value::Bool(false))
}

fn merge_outcome(
    collections: &mut HashMap<String, CollectionOutcome>,
    collection: &str,
    action: AppliedAction,
    count: u64,
) {
    collections
        .entry(collection.to_string())
        .and_modify(|outcome| {
            outcome.count += count;
            // Deletion dominates when two rules hit one collection
            if action == AppliedAction::Deleted {
                outcome.action = action;
            }
        })
        .or_insert(CollectionOutcome { action, count });
}
