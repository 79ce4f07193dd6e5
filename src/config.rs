//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Tunables for impact analysis and cascade execution
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// A single CASCADE relationship above this count raises a High warning
    pub warn_threshold: u64,
    /// Cumulative cascade count above this raises a Critical warning
    pub critical_threshold: u64,
    /// Advisory throughput constant for duration estimates (records/sec)
    pub throughput_rps: u64,
    /// Attempt a best-effort rollback when an execute aborts mid-unit
    pub emergency_rollback: bool,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            warn_threshold: 100,
            critical_threshold: 1000,
            throughput_rps: 500,
            emergency_rollback: false,
        }
    }
}

/// Snapshot retention and storage settings
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Days before a snapshot expires and can no longer be rolled back
    pub retention_days: i64,
    /// Collection holding snapshot documents
    pub collection: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            collection: "deletion_snapshots".to_string(),
        }
    }
}

/// Audit trail settings
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Collection holding append-only audit entries
    pub collection: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            collection: "deletion_audit_log".to_string(),
        }
    }
}

/// Complete settings for the deletion core
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub cascade: CascadeConfig,
    pub snapshot: SnapshotConfig,
    pub audit: AuditConfig,
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let cascade = CascadeConfig {
            warn_threshold: parse_env("CASCADE_WARN_THRESHOLD")?
                .unwrap_or_else(|| CascadeConfig::default().warn_threshold),
            critical_threshold: parse_env("CASCADE_CRITICAL_THRESHOLD")?
                .unwrap_or_else(|| CascadeConfig::default().critical_threshold),
            throughput_rps: parse_env("CASCADE_THROUGHPUT_RPS")?
                .unwrap_or_else(|| CascadeConfig::default().throughput_rps),
            emergency_rollback: parse_env("CASCADE_EMERGENCY_ROLLBACK")?
                .unwrap_or_else(|| CascadeConfig::default().emergency_rollback),
        };

        let snapshot = SnapshotConfig {
            retention_days: parse_env("SNAPSHOT_RETENTION_DAYS")?
                .unwrap_or_else(|| SnapshotConfig::default().retention_days),
            collection: std::env::var("SNAPSHOT_COLLECTION")
                .unwrap_or_else(|_| SnapshotConfig::default().collection),
        };

        let audit = AuditConfig {
            collection: std::env::var("AUDIT_COLLECTION")
                .unwrap_or_else(|_| AuditConfig::default().collection),
        };

        if cascade.throughput_rps == 0 {
            return Err(ConfigError::InvalidValue(
                "CASCADE_THROUGHPUT_RPS must be greater than zero".to_string(),
            ));
        }
        if snapshot.retention_days <= 0 {
            return Err(ConfigError::InvalidValue(
                "SNAPSHOT_RETENTION_DAYS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            cascade,
            snapshot,
            audit,
        })
    }
}

/// Parse an optional environment variable, erroring on malformed values
fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{} has an invalid value", name))),
        Err(_) => Ok(None),
    }
}
