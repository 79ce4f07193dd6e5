//! Cascadeflow - deletion-and-consistency core for document stores
//!
//! When a primary entity is removed from a schema-less document store, every
//! record referencing it must be updated consistently: some deleted, some
//! preserved with a redaction marker, some merely stripped of the dangling
//! pointer. This crate implements that logic by hand, since such stores have
//! no native foreign-key cascade:
//!
//! - A static [`registry::RelationshipRegistry`] declares, per primary entity
//!   type, every referencing collection, field path and policy.
//! - [`cascade::analyzer::ImpactAnalyzer`] previews what a deletion would do
//!   before anything changes.
//! - [`snapshot::SnapshotManager`] captures full pre-deletion state for a
//!   bounded rollback window.
//! - [`cascade::executor::CascadeExecutor`] applies all policies and removes
//!   the primary as one atomic unit of work.
//! - [`cascade::rollback::RollbackEngine`] restores a snapshot, best-effort.
//! - [`audit::AuditLogger`] keeps an append-only compliance trail.
//! - [`cascade::orphans::OrphanScanner`] finds and repairs references gone
//!   stale through ordinary bugs, outside the deletion flow.
//!
//! Storage is abstracted behind [`store::DocumentStore`]; an in-memory
//! implementation ships for tests and embedding.

pub mod audit;
pub mod cascade;
pub mod config;
pub mod error;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod telemetry;

pub use audit::{AuditFilter, AuditLogEntry, AuditLogger, AuditStatus, Pagination};
pub use cascade::analyzer::{ImpactAnalyzer, ImpactReport, ImpactWarning, WarningSeverity};
pub use cascade::executor::CascadeExecutor;
pub use cascade::orphans::{OrphanReport, OrphanScanner};
pub use cascade::rollback::{RollbackEngine, RollbackResult, RollbackStatus};
pub use cascade::{
    AppliedAction, CollectionOutcome, DeletionOptions, OperationKind, OperationResult,
    RollbackOptions,
};
pub use config::Settings;
pub use error::{CoreResult, DeletionError, ErrorBody};
pub use registry::{ReferencePolicy, RelationshipRegistry, RelationshipRule};
pub use service::{DeletionService, OrphanCleanupOptions, ResponseEnvelope};
pub use snapshot::{DeletionSnapshot, SnapshotManager};
pub use store::{DocumentStore, FieldRef, MemoryStore, Patch, Predicate, StoreError};
pub use telemetry::init_tracing;
