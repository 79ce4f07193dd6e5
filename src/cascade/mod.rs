//! Cascade pipeline
//!
//! Preview, execute, rollback and orphan repair all share the types in this
//! module and, critically, one policy dispatch function: the executor and
//! the orphan repairer apply CASCADE / PRESERVE / CLEANUP through the same
//! code path, so the two can never drift apart.

pub mod analyzer;
pub mod executor;
pub mod orphans;
pub mod rollback;

use crate::registry::{ReferencePolicy, RelationshipRule};
use crate::store::{CollectionOps, Patch, Predicate, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Kind of operation recorded in results and audit entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Preview,
    Execute,
    Cleanup,
    Rollback,
}

/// What was done to the records of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliedAction {
    /// Records removed (CASCADE, or hard primary delete)
    Deleted,
    /// Records kept, reference replaced by a redaction stamp (PRESERVE)
    Redacted,
    /// Records kept, dangling reference stripped (CLEANUP)
    Cleaned,
    /// Primary record soft-deleted
    Deactivated,
}

/// Per-collection outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOutcome {
    pub action: AppliedAction,
    pub count: u64,
}

/// Result envelope shared by execute / cleanup operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub target_entity_id: String,
    /// Collection name -> what happened there
    pub collections: HashMap<String, CollectionOutcome>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<Uuid>,
    pub dry_run: bool,
}

impl OperationResult {
    /// Total records touched across all collections
    pub fn total_affected(&self) -> u64 {
        self.collections.values().map(|outcome| outcome.count).sum()
    }
}

/// Options recognized by `execute_deletion`
#[derive(Debug, Clone)]
pub struct DeletionOptions {
    /// Physically remove the primary instead of deactivating it
    pub hard_delete: bool,
    /// Capture a snapshot before mutating (default true)
    pub create_snapshot: bool,
    /// Report what would happen without writing anything
    pub dry_run: bool,
    /// Collections whose PRESERVE rules should actually preserve; a PRESERVE
    /// rule outside this set falls back to CASCADE
    pub preserve_collections: HashSet<String>,
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            hard_delete: false,
            create_snapshot: true,
            dry_run: false,
            preserve_collections: HashSet::new(),
        }
    }
}

/// Options recognized by `rollback`
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Skip records created or changed after the deletion instead of
    /// overwriting them
    pub preserve_new_data: bool,
}

/// The immutable marker left in place of a preserved reference
pub fn redaction_stamp(original_entity_id: &str, operator_id: Uuid, at: DateTime<Utc>) -> Value {
    json!({
        "originalEntityId": original_entity_id,
        "redactedAt": at.to_rfc3339(),
        "redactedBy": operator_id,
    })
}

/// Apply one relationship rule against its referencing collection. Used by
/// the cascade executor (inside its atomic session) and by the orphan
/// repairer (directly against the store).
///
/// PRESERVE only preserves when `preserve` is set; otherwise it falls back
/// to CASCADE.
pub(crate) async fn apply_rule(
    ops: &dyn CollectionOps,
    rule: &RelationshipRule,
    target_id: &str,
    preserve: bool,
    operator_id: Uuid,
) -> Result<(AppliedAction, u64), StoreError> {
    let target = json!(target_id);
    let predicate = Predicate::FieldEq(rule.field.clone(), target.clone());

    let effective = match rule.policy {
        ReferencePolicy::Preserve if preserve => ReferencePolicy::Preserve,
        ReferencePolicy::Preserve => ReferencePolicy::Cascade,
        other => other,
    };

    match effective {
        ReferencePolicy::Cascade => {
            let count = ops
                .delete_many(&rule.referencing_collection, &predicate)
                .await?;
            Ok((AppliedAction::Deleted, count))
        }
        ReferencePolicy::Preserve => {
            let stamp = redaction_stamp(target_id, operator_id, Utc::now());
            let count = ops
                .update_many(
                    &rule.referencing_collection,
                    &predicate,
                    &Patch::SetRef {
                        field: rule.field.clone(),
                        target: target.clone(),
                        value: stamp,
                    },
                )
                .await?;
            Ok((AppliedAction::Redacted, count))
        }
        ReferencePolicy::Cleanup => {
            let count = ops
                .update_many(
                    &rule.referencing_collection,
                    &predicate,
                    &Patch::ClearRef {
                        field: rule.field.clone(),
                        target,
                    },
                )
                .await?;
            Ok((AppliedAction::Cleaned, count))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RelationshipRegistry;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_preserve_falls_back_to_cascade_when_not_requested() {
        let store = MemoryStore::new();
        store
            .insert("notes", json!({"id": "n1", "personId": "P"}))
            .await
            .unwrap();

        let registry = RelationshipRegistry::builder("persons")
            .preserve("notes", "personId")
            .build()
            .unwrap();
        let rule = &registry.rules()[0];

        let (action, count) = apply_rule(&store, rule, "P", false, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(action, AppliedAction::Deleted);
        assert_eq!(count, 1);
        assert_eq!(store.find("notes", &Predicate::All).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_preserve_stamps_reference_when_requested() {
        let store = MemoryStore::new();
        store
            .insert("notes", json!({"id": "n1", "personId": "P", "body": "keep me"}))
            .await
            .unwrap();

        let registry = RelationshipRegistry::builder("persons")
            .preserve("notes", "personId")
            .build()
            .unwrap();
        let rule = &registry.rules()[0];

        let (action, count) = apply_rule(&store, rule, "P", true, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(action, AppliedAction::Redacted);
        assert_eq!(count, 1);

        let note = store
            .find_one("notes", &Predicate::IdEq("n1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note["body"], json!("keep me"));
        assert_eq!(note["personId"]["originalEntityId"], json!("P"));
        assert!(note["personId"]["redactedAt"].is_string());
    }
}
