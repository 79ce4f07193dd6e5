//! Impact Analyzer
//!
//! "What goes away if I delete this record?"
//! Read-only walk of the relationship registry that counts affected records
//! per relationship, classifies the risk, and estimates duration before
//! anything changes.

use crate::cascade::{AppliedAction, DeletionOptions};
use crate::config::CascadeConfig;
use crate::error::{CoreResult, DeletionError};
use crate::registry::{ReferencePolicy, RelationshipRegistry};
use crate::store::{DocumentStore, Predicate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Severity of an impact warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    High,
    Critical,
}

/// A warning raised during preview
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactWarning {
    pub severity: WarningSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub message: String,
}

/// Impact of one declared relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipImpact {
    pub referencing_collection: String,
    pub field_path: String,
    pub policy: ReferencePolicy,
    /// What the executor would do to these records under the given options
    pub planned_action: AppliedAction,
    pub matched: u64,
}

/// Summary counts over all relationships
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactSummary {
    /// Records across all relationships, primary excluded
    pub total_referencing: u64,
    /// Records that would be deleted outright
    pub cascade_total: u64,
    pub collections_touched: usize,
}

/// Complete preview of a deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactReport {
    pub primary_id: String,
    pub primary_collection: String,
    pub relationships: Vec<RelationshipImpact>,
    pub summary: ImpactSummary,
    pub warnings: Vec<ImpactWarning>,
    /// Advisory only, derived from a fixed throughput constant
    pub estimated_duration_ms: u64,
    pub explanation: String,
    pub generated_at: DateTime<Utc>,
}

/// Side-effect-free deletion preview
pub struct ImpactAnalyzer {
    store: Arc<dyn DocumentStore>,
    registry: Arc<RelationshipRegistry>,
    config: CascadeConfig,
}

impl ImpactAnalyzer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<RelationshipRegistry>,
        config: CascadeConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Count affected records per relationship and classify the risk
    pub async fn preview(
        &self,
        primary_id: &str,
        options: &DeletionOptions,
    ) -> CoreResult<ImpactReport> {
        let primary = self
            .store
            .find_one(
                &self.registry.primary_collection,
                &Predicate::IdEq(primary_id.to_string()),
            )
            .await?;
        if primary.is_none() {
            return Err(DeletionError::NotFound(format!(
                "primary record '{}' in '{}'",
                primary_id, self.registry.primary_collection
            )));
        }

        let mut relationships = Vec::new();
        let mut warnings = Vec::new();
        let mut cascade_total = 0u64;
        let mut total_referencing = 0u64;

        for rule in self.registry.rules() {
            let matched = self
                .store
                .count(
                    &rule.referencing_collection,
                    &Predicate::FieldEq(rule.field.clone(), json!(primary_id)),
                )
                .await?;

            let planned_action = match rule.policy {
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

            total_referencing += matched;
            if planned_action == AppliedAction::Deleted {
                cascade_total += matched;
                if matched > self.config.warn_threshold {
                    warnings.push(ImpactWarning {
                        severity: WarningSeverity::High,
                        collection: Some(rule.referencing_collection.clone()),
                        message: format!(
                            "Deleting '{}' would remove {} records from '{}' (threshold {})",
                            primary_id, matched, rule.referencing_collection, self.config.warn_threshold
                        ),
                    });
                }
            }

            relationships.push(RelationshipImpact {
                referencing_collection: rule.referencing_collection.clone(),
                field_path: rule.display_path(),
                policy: rule.policy,
                planned_action,
                matched,
            });
        }

        if cascade_total > self.config.critical_threshold {
            warnings.push(ImpactWarning {
                severity: WarningSeverity::Critical,
                collection: None,
                message: format!(
                    "Cumulative cascade of {} records exceeds the critical threshold of {}",
                    cascade_total, self.config.critical_threshold
                ),
            });
        }

        let collections_touched = relationships
            .iter()
            .filter(|impact| impact.matched > 0)
            .count();
        let summary = ImpactSummary {
            total_referencing,
            cascade_total,
            collections_touched,
        };

        // Primary record itself counts toward the work estimate
        let total_records = total_referencing + 1;
        let estimated_duration_ms = (total_records * 1000).div_ceil(self.config.throughput_rps);

        let explanation = Self::explain(primary_id, &summary, &warnings);
        info!(
            primary_id,
            total = total_referencing,
            cascade = cascade_total,
            warnings = warnings.len(),
            "Deletion impact preview complete"
        );

        Ok(ImpactReport {
            primary_id: primary_id.to_string(),
            primary_collection: self.registry.primary_collection.clone(),
            relationships,
            summary,
            warnings,
            estimated_duration_ms,
            explanation,
            generated_at: Utc::now(),
        })
    }

    fn explain(primary_id: &str, summary: &ImpactSummary, warnings: &[ImpactWarning]) -> String {
        if summary.total_referencing == 0 {
            return format!(
                "No referencing records found for '{}'. Deletion affects only the primary record.",
                primary_id
            );
        }
        let worst = warnings
            .iter()
            .map(|warning| warning.severity)
            .max_by_key(|severity| *severity as u8);
        match worst {
            Some(WarningSeverity::Critical) => format!(
                "Deleting '{}' cascades through {} records across {} collections. Review before confirming.",
                primary_id, summary.total_referencing, summary.collections_touched
            ),
            Some(WarningSeverity::High) => format!(
                "Deleting '{}' affects {} records across {} collections, including one large cascade.",
                primary_id, summary.total_referencing, summary.collections_touched
            ),
            None => format!(
                "Deleting '{}' affects {} records across {} collections.",
                primary_id, summary.total_referencing, summary.collections_touched
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionOps, MemoryStore};

    fn analyzer(store: Arc<MemoryStore>) -> ImpactAnalyzer {
        let registry = Arc::new(
            RelationshipRegistry::builder("persons")
                .cascade("notes", "personId")
                .cleanup("sessions", "refs.pId")
                .build()
                .unwrap(),
        );
        ImpactAnalyzer::new(store, registry, CascadeConfig::default())
    }

    #[tokio::test]
    async fn test_preview_missing_primary() {
        let store = Arc::new(MemoryStore::new());
        let analyzer = analyzer(store);
        let err = analyzer
            .preview("ghost", &DeletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_preview_counts_per_relationship() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("persons", json!({"id": "P"}))
            .await
            .unwrap();
        for i in 0..3 {
            store
                .insert("notes", json!({"id": format!("n{i}"), "personId": "P"}))
                .await
                .unwrap();
        }
        store
            .insert("sessions", json!({"id": "s1", "refs": {"pId": "P"}}))
            .await
            .unwrap();

        let analyzer = analyzer(store);
        let report = analyzer
            .preview("P", &DeletionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.relationships[0].matched, 3);
        assert_eq!(report.relationships[0].planned_action, AppliedAction::Deleted);
        assert_eq!(report.relationships[1].matched, 1);
        assert_eq!(report.relationships[1].planned_action, AppliedAction::Cleaned);
        assert_eq!(report.summary.cascade_total, 3);
        assert!(report.warnings.is_empty());
        assert!(report.estimated_duration_ms > 0);
    }

    #[tokio::test]
    async fn test_large_cascade_raises_one_high_warning() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("persons", json!({"id": "P"}))
            .await
            .unwrap();
        for i in 0..150 {
            store
                .insert("notes", json!({"id": format!("n{i}"), "personId": "P"}))
                .await
                .unwrap();
        }

        let analyzer = analyzer(store);
        let report = analyzer
            .preview("P", &DeletionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].severity, WarningSeverity::High);
        assert!(report.estimated_duration_ms > 0);
    }

    #[tokio::test]
    async fn test_cumulative_cascade_raises_critical() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("persons", json!({"id": "P"}))
            .await
            .unwrap();
        for i in 0..1200 {
            store
                .insert("notes", json!({"id": format!("n{i}"), "personId": "P"}))
                .await
                .unwrap();
        }

        let analyzer = analyzer(store);
        let report = analyzer
            .preview("P", &DeletionOptions::default())
            .await
            .unwrap();

        assert!(report
            .warnings
            .iter()
            .any(|warning| warning.severity == WarningSeverity::Critical));
        assert!(report
            .warnings
            .iter()
            .any(|warning| warning.severity == WarningSeverity::High));
    }
}
