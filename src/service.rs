//! Deletion service facade
//!
//! Wires the registry, snapshot manager, executor, rollback engine, orphan
//! scanner and audit logger together behind the caller-facing operations.
//! Every operation can be wrapped into a structured success/failure envelope
//! carrying a machine-readable error code; the transport around this crate
//! decides how to ship it.

use crate::audit::{AuditFilter, AuditLogEntry, AuditLogger, AuditStatus, Pagination};
use crate::cascade::analyzer::{ImpactAnalyzer, ImpactReport};
use crate::cascade::executor::CascadeExecutor;
use crate::cascade::orphans::{OrphanReport, OrphanScanner};
use crate::cascade::rollback::{RollbackEngine, RollbackResult, RollbackStatus};
use crate::cascade::{DeletionOptions, OperationKind, OperationResult, RollbackOptions};
use crate::config::Settings;
use crate::error::{CoreResult, ErrorBody};
use crate::registry::RelationshipRegistry;
use crate::snapshot::SnapshotManager;
use crate::store::DocumentStore;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Options recognized by `cleanup_orphans`
#[derive(Debug, Clone, Default)]
pub struct OrphanCleanupOptions {
    /// Restrict the pass to these referencing collections; `None` scans all
    pub collections: Option<Vec<String>>,
    pub dry_run: bool,
}

/// Structured success/failure wrapper for transport layers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> ResponseEnvelope<T> {
    pub fn from_result(result: CoreResult<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                error: Some(ErrorBody::from(&e)),
            },
        }
    }
}

/// The deletion-and-consistency core, assembled
pub struct DeletionService {
    analyzer: ImpactAnalyzer,
    executor: CascadeExecutor,
    rollback: Arc<RollbackEngine>,
    scanner: OrphanScanner,
    snapshots: Arc<SnapshotManager>,
    audit: AuditLogger,
}

impl DeletionService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<RelationshipRegistry>,
        settings: Settings,
    ) -> Self {
        let snapshots = Arc::new(SnapshotManager::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            settings.snapshot.clone(),
        ));
        let rollback = Arc::new(RollbackEngine::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
        ));
        let executor = CascadeExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&snapshots),
            Arc::clone(&rollback),
            settings.cascade.clone(),
        );
        let analyzer = ImpactAnalyzer::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            settings.cascade.clone(),
        );
        let scanner = OrphanScanner::new(Arc::clone(&store), Arc::clone(&registry));
        let audit = AuditLogger::new(store, settings.audit.clone());

        Self {
            analyzer,
            executor,
            rollback,
            scanner,
            snapshots,
            audit,
        }
    }

    /// Read-only impact preview; run this before asking for confirmation
    pub async fn preview_deletion(
        &self,
        primary_id: &str,
        options: &DeletionOptions,
    ) -> CoreResult<ImpactReport> {
        self.analyzer.preview(primary_id, options).await
    }

    /// Execute the cascade as one atomic unit, then audit the outcome
    pub async fn execute_deletion(
        &self,
        primary_id: &str,
        options: &DeletionOptions,
        operator_id: Uuid,
    ) -> CoreResult<OperationResult> {
        let outcome = self.executor.execute(primary_id, options, operator_id).await;
        match &outcome {
            Ok(result) if result.dry_run => {}
            Ok(result) => {
                self.audit
                    .record(AuditLogEntry::new(
                        result.operation_id,
                        OperationKind::Execute,
                        operator_id,
                        primary_id,
                        AuditStatus::Success,
                        json!({
                            "collections": result.collections,
                            "snapshotId": result.snapshot_id,
                            "hardDelete": options.hard_delete,
                        }),
                    ))
                    .await;
            }
            Err(e) => {
                self.audit
                    .record(AuditLogEntry::new(
                        Uuid::new_v4(),
                        OperationKind::Execute,
                        operator_id,
                        primary_id,
                        AuditStatus::Failed,
                        json!({
                            "code": e.code(),
                            "snapshotId": e.snapshot_id(),
                        }),
                    ))
                    .await;
            }
        }
        outcome
    }

    /// Scan for stale references and repair them; audited unless dry-run
    pub async fn cleanup_orphans(
        &self,
        options: &OrphanCleanupOptions,
        operator_id: Uuid,
    ) -> CoreResult<OperationResult> {
        let report = self.scanner.scan(options.collections.as_deref()).await?;
        let outcome = self
            .scanner
            .repair(&report, options.dry_run, operator_id)
            .await;
        match &outcome {
            Ok(result) if !result.dry_run => {
                self.audit
                    .record(AuditLogEntry::new(
                        result.operation_id,
                        OperationKind::Cleanup,
                        operator_id,
                        &result.target_entity_id,
                        AuditStatus::Success,
                        json!({
                            "orphansFound": report.orphans.len(),
                            "collections": result.collections,
                        }),
                    ))
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                self.audit
                    .record(AuditLogEntry::new(
                        Uuid::new_v4(),
                        OperationKind::Cleanup,
                        operator_id,
                        "*",
                        AuditStatus::Failed,
                        json!({"code": e.code()}),
                    ))
                    .await;
            }
        }
        outcome
    }

    /// Restore a snapshot; partial restores report `Partial`, not an error
    pub async fn rollback(
        &self,
        snapshot_id: Uuid,
        options: &RollbackOptions,
        operator_id: Uuid,
    ) -> CoreResult<RollbackResult> {
        let outcome = self.rollback.rollback(snapshot_id, options, operator_id).await;
        match &outcome {
            Ok(result) => {
                let status = match result.status {
                    RollbackStatus::Success => AuditStatus::Success,
                    RollbackStatus::Partial => AuditStatus::Partial,
                };
                self.audit
                    .record(AuditLogEntry::new(
                        result.operation_id,
                        OperationKind::Rollback,
                        operator_id,
                        &result.primary_record_id,
                        status,
                        json!({
                            "snapshotId": snapshot_id,
                            "restored": result.restored,
                            "conflicts": result.conflicts.len(),
                            "failures": result.failures.len(),
                        }),
                    ))
                    .await;
            }
            Err(e) => {
                self.audit
                    .record(AuditLogEntry::new(
                        Uuid::new_v4(),
                        OperationKind::Rollback,
                        operator_id,
                        &snapshot_id.to_string(),
                        AuditStatus::Failed,
                        json!({"code": e.code()}),
                    ))
                    .await;
            }
        }
        outcome
    }

    /// Filtered, paginated audit trail, newest first
    pub async fn list_audit_log(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> CoreResult<Vec<AuditLogEntry>> {
        self.audit.list(filter, pagination).await
    }

    /// Run a standalone orphan scan without repairing anything
    pub async fn scan_orphans(&self, collections: Option<&[String]>) -> CoreResult<OrphanReport> {
        self.scanner.scan(collections).await
    }

    /// Drop snapshots past their retention window
    pub async fn prune_snapshots(&self) -> CoreResult<usize> {
        self.snapshots.prune_expired().await
    }

    /// Access to stored snapshots (inspection, manual recovery tooling)
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }
}
