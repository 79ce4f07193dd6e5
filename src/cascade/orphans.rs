//! Orphan Scanner/Repairer
//!
//! Independent consistency pass driven by the same relationship registry as
//! the executor. Finds references pointing at primary ids that no longer
//! exist (stale through ordinary application bugs, not an explicit delete)
//! and repairs them with the exact same policy dispatch the executor uses.

use crate::cascade::{apply_rule, AppliedAction, CollectionOutcome, OperationKind, OperationResult};
use crate::error::{CoreResult, DeletionError};
use crate::registry::{ReferencePolicy, RelationshipRegistry, RelationshipRule};
use crate::store::{doc_id, DocumentStore, FieldRef, Predicate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One dangling reference found during a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanRef {
    pub collection: String,
    pub record_id: String,
    pub field_path: String,
    /// The primary id the reference points at, absent from the source
    /// collection
    pub missing_target: String,
    pub policy: ReferencePolicy,
}

/// Result of an orphan scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    pub rules_scanned: usize,
    pub records_scanned: u64,
    pub orphans: Vec<OrphanRef>,
    pub generated_at: DateTime<Utc>,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty()
    }
}

/// Finds and repairs stale references outside the deletion flow
pub struct OrphanScanner {
    store: Arc<dyn DocumentStore>,
    registry: Arc<RelationshipRegistry>,
}

impl OrphanScanner {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<RelationshipRegistry>) -> Self {
        Self { store, registry }
    }

    /// Walk every rule (optionally restricted to a collection list) and
    /// report references whose target primary no longer exists. Read-only.
    pub async fn scan(&self, collections: Option<&[String]>) -> CoreResult<OrphanReport> {
        let mut orphans = Vec::new();
        let mut records_scanned = 0u64;
        let mut rules_scanned = 0usize;
        // Target existence is checked once per id, not per reference
        let mut known: HashMap<String, bool> = HashMap::new();

        for rule in self.registry.rules_for(collections) {
            rules_scanned += 1;
            let records = self
                .store
                .find(
                    &rule.referencing_collection,
                    &Predicate::FieldExists(rule.field.clone()),
                )
                .await?;
            records_scanned += records.len() as u64;

            for record in &records {
                let record_id = doc_id(record).unwrap_or_default().to_string();
                for target in referenced_ids(record, &rule.field) {
                    let exists = match known.get(&target) {
                        Some(exists) => *exists,
                        None => {
                            let exists = self
                                .store
                                .count(
                                    &rule.source_collection,
                                    &Predicate::IdEq(target.clone()),
                                )
                                .await?
                                > 0;
                            known.insert(target.clone(), exists);
                            exists
                        }
                    };
                    if !exists {
                        orphans.push(OrphanRef {
                            collection: rule.referencing_collection.clone(),
                            record_id: record_id.clone(),
                            field_path: rule.display_path(),
                            missing_target: target,
                            policy: rule.policy,
                        });
                    }
                }
            }
        }

        info!(
            rules_scanned,
            records_scanned,
            orphans = orphans.len(),
            "Orphan scan complete"
        );
        Ok(OrphanReport {
            rules_scanned,
            records_scanned,
            orphans,
            generated_at: Utc::now(),
        })
    }

    /// Repair every orphan in the report through the shared policy dispatch.
    /// PRESERVE applies directly here: the target is already gone, so the
    /// surviving record is kept and its pointer redacted. Idempotent.
    pub async fn repair(
        &self,
        report: &OrphanReport,
        dry_run: bool,
        operator_id: Uuid,
    ) -> CoreResult<OperationResult> {
        let started_at = Utc::now();
        let operation_id = Uuid::new_v4();
        let mut collections: HashMap<String, CollectionOutcome> = HashMap::new();

        if dry_run {
            for orphan in &report.orphans {
                let action = planned_action(orphan.policy);
                collections
                    .entry(orphan.collection.clone())
                    .and_modify(|outcome| outcome.count += 1)
                    .or_insert(CollectionOutcome { action, count: 1 });
            }
            return Ok(OperationResult {
                operation_id,
                kind: OperationKind::Cleanup,
                target_entity_id: "*".to_string(),
                collections,
                warnings: vec!["dry run: no changes were applied".to_string()],
                started_at,
                completed_at: Utc::now(),
                snapshot_id: None,
                dry_run: true,
            });
        }

        // One dispatch per (rule, missing target); a rule application covers
        // every orphaned record pointing at that target
        let mut dispatched: HashSet<(String, String, String)> = HashSet::new();
        for orphan in &report.orphans {
            let key = (
                orphan.collection.clone(),
                orphan.field_path.clone(),
                orphan.missing_target.clone(),
            );
            if !dispatched.insert(key) {
                continue;
            }
            let rule = self
                .rule_for(&orphan.collection, &orphan.field_path)
                .ok_or_else(|| {
                    DeletionError::Registry(format!(
                        "no rule for '{}.{}'",
                        orphan.collection, orphan.field_path
                    ))
                })?;
            let (action, count) = apply_rule(
                self.store.as_ref() as &dyn crate::store::CollectionOps,
                rule,
                &orphan.missing_target,
                true,
                operator_id,
            )
            .await?;
            collections
                .entry(orphan.collection.clone())
                .and_modify(|outcome| outcome.count += count)
                .or_insert(CollectionOutcome { action, count });
        }

        info!(
            %operation_id,
            repaired = collections.values().map(|outcome| outcome.count).sum::<u64>(),
            "Orphan repair complete"
        );
        Ok(OperationResult {
            operation_id,
            kind: OperationKind::Cleanup,
            target_entity_id: "*".to_string(),
            collections,
            warnings: Vec::new(),
            started_at,
            completed_at: Utc::now(),
            snapshot_id: None,
            dry_run: false,
        })
    }

    fn rule_for(&self, collection: &str, field_path: &str) -> Option<&RelationshipRule> {
        self.registry.rules().iter().find(|rule| {
            rule.referencing_collection == collection && rule.display_path() == field_path
        })
    }
}

fn planned_action(policy: ReferencePolicy) -> AppliedAction {
    match policy {
        ReferencePolicy::Cascade => AppliedAction::Deleted,
        ReferencePolicy::Preserve => AppliedAction::Redacted,
        ReferencePolicy::Cleanup => AppliedAction::Cleaned,
    }
}

/// Extract the primary ids a record points at through one field descriptor.
/// Only string values count: a redaction stamp is an object and is therefore
/// never reported as an orphan.
fn referenced_ids(record: &Value, field: &FieldRef) -> Vec<String> {
    match field {
        FieldRef::Scalar { path } => crate::store::get_path(record, path)
            .and_then(Value::as_str)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default(),
        FieldRef::ArrayMember {
            container,
            match_field,
        } => crate::store::get_path(record, container)
            .and_then(Value::as_array)
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|element| element.get(match_field).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionOps, MemoryStore};
    use serde_json::json;

    fn scanner(store: Arc<MemoryStore>) -> OrphanScanner {
        let registry = Arc::new(
            RelationshipRegistry::builder("persons")
                .cascade("notes", "personId")
                .cleanup("sessions", "refs.pId")
                .preserve("reports", "authorId")
                .build()
                .unwrap(),
        );
        OrphanScanner::new(store, registry)
    }

    async fn seed(store: &MemoryStore) {
        store
            .insert("persons", json!({"id": "P"}))
            .await
            .unwrap();
        // Healthy references
        store
            .insert("notes", json!({"id": "n1", "personId": "P"}))
            .await
            .unwrap();
        // Dangling references to a primary that never existed
        store
            .insert("notes", json!({"id": "n2", "personId": "ghost"}))
            .await
            .unwrap();
        store
            .insert("sessions", json!({"id": "s1", "refs": {"pId": "ghost"}}))
            .await
            .unwrap();
        store
            .insert("reports", json!({"id": "r1", "authorId": "ghost", "body": "text"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scan_finds_only_dangling_references() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let scanner = scanner(store);

        let report = scanner.scan(None).await.unwrap();
        assert_eq!(report.orphans.len(), 3);
        assert!(report
            .orphans
            .iter()
            .all(|orphan| orphan.missing_target == "ghost"));
    }

    #[tokio::test]
    async fn test_scan_respects_collection_filter() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let scanner = scanner(store);

        let filter = vec!["notes".to_string()];
        let report = scanner.scan(Some(&filter)).await.unwrap();
        assert_eq!(report.rules_scanned, 1);
        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].collection, "notes");
    }

    #[tokio::test]
    async fn test_repair_applies_policies_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let scanner = scanner(Arc::clone(&store));

        let report = scanner.scan(None).await.unwrap();
        let result = scanner
            .repair(&report, false, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(result.collections["notes"].action, AppliedAction::Deleted);
        assert_eq!(result.collections["sessions"].action, AppliedAction::Cleaned);
        assert_eq!(result.collections["reports"].action, AppliedAction::Redacted);

        // Cascade removed the orphaned note, healthy note survives
        let notes = store.find("notes", &Predicate::All).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["id"], json!("n1"));

        // Preserved report keeps its body, pointer is now a stamp
        let reports = store.find("reports", &Predicate::All).await.unwrap();
        assert_eq!(reports[0]["body"], json!("text"));
        assert_eq!(reports[0]["authorId"]["originalEntityId"], json!("ghost"));

        // A second pass finds nothing left to repair
        let rescan = scanner.scan(None).await.unwrap();
        assert!(rescan.is_clean());
    }

    #[tokio::test]
    async fn test_dry_run_repair_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let scanner = scanner(Arc::clone(&store));

        let report = scanner.scan(None).await.unwrap();
        let result = scanner
            .repair(&report, true, Uuid::new_v4())
            .await
            .unwrap();
        assert!(result.dry_run);
        assert_eq!(result.total_affected(), 3);

        let rescan = scanner.scan(None).await.unwrap();
        assert_eq!(rescan.orphans.len(), 3);
    }
}
