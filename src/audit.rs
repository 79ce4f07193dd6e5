//! Audit Logger
//!
//! Append-only trail of every attempted operation, its outcome and the
//! operator behind it. Writes are best-effort by design: a failed audit write
//! is logged and swallowed, it must never turn a successful deletion into a
//! reported failure.

use crate::cascade::OperationKind;
use crate::config::AuditConfig;
use crate::error::CoreResult;
use crate::store::{DocumentStore, FieldRef, Predicate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Outcome recorded for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Success,
    Failed,
    Partial,
}

/// One append-only audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub operator_id: Uuid,
    pub target_entity_id: String,
    pub status: AuditStatus,
    /// Structured payload: per-collection counts, warnings, error codes
    pub details: Value,
}

impl AuditLogEntry {
    pub fn new(
        operation_id: Uuid,
        kind: OperationKind,
        operator_id: Uuid,
        target_entity_id: &str,
        status: AuditStatus,
        details: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_id,
            kind,
            timestamp: Utc::now(),
            operator_id,
            target_entity_id: target_entity_id.to_string(),
            status,
            details,
        }
    }
}

/// Filter for `list`; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub kind: Option<OperationKind>,
    pub operator_id: Option<Uuid>,
    pub target_entity_id: Option<String>,
}

/// Offset/limit pagination over the filtered trail
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Appends and queries the audit trail
pub struct AuditLogger {
    store: Arc<dyn DocumentStore>,
    config: AuditConfig,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn DocumentStore>, config: AuditConfig) -> Self {
        Self { store, config }
    }

    /// Append one entry, best-effort. Failures are logged, never raised.
    pub async fn record(&self, entry: AuditLogEntry) {
        let document = match serde_json::to_value(&entry) {
            Ok(document) => document,
            Err(e) => {
                warn!(operation_id = %entry.operation_id, error = %e, "Audit entry could not be serialized; dropping it");
                return;
            }
        };
        if let Err(e) = self.store.insert(&self.config.collection, document).await {
            warn!(operation_id = %entry.operation_id, error = %e, "Audit write failed; the triggering operation is unaffected");
        }
    }

    /// Filtered, paginated listing, newest first
    pub async fn list(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> CoreResult<Vec<AuditLogEntry>> {
        let mut parts = Vec::new();
        if let Some(kind) = filter.kind {
            parts.push(Predicate::FieldEq(
                FieldRef::scalar("kind"),
                serde_json::to_value(kind).unwrap_or(Value::Null),
            ));
        }
        if let Some(operator_id) = filter.operator_id {
            parts.push(Predicate::FieldEq(
                FieldRef::scalar("operatorId"),
                json!(operator_id),
            ));
        }
        if let Some(target) = &filter.target_entity_id {
            parts.push(Predicate::FieldEq(
                FieldRef::scalar("targetEntityId"),
                json!(target),
            ));
        }
        let predicate = if parts.is_empty() {
            Predicate::All
        } else {
            Predicate::And(parts)
        };

        let documents = self.store.find(&self.config.collection, &predicate).await?;
        let mut entries: Vec<AuditLogEntry> = documents
            .into_iter()
            .filter_map(|document| serde_json::from_value(document).ok())
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect())
    }
}
