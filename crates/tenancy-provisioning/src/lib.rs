//! Multi-tenant resource provisioning
//!
//! This crate coordinates the creation and teardown of per-tenant resources:
//! - Database isolation (separate database, schema, or table prefix)
//! - Storage directory trees with quota metadata
//! - Generated configuration artifacts
//! - All-or-nothing provisioning with reverse-order rollback
//! - Best-effort deprovisioning with optional backups

pub mod component;
pub mod database;
pub mod fs;
pub mod log;
pub mod orchestrator;
pub mod quota;
pub mod settings;
pub mod storage;
pub mod store;
pub mod tenant;
pub mod tenant_config;

pub use component::*;
pub use database::{
    ConnectionRegistry, DatabaseConnection, DatabaseProvisioner, DatabaseRecord, DatabaseUser,
    InMemoryDatabase, PostgresConnection, Row,
};
pub use fs::{Filesystem, FsEntry, LocalFilesystem};
pub use log::{ProvisioningLog, ProvisioningLogEntry};
pub use orchestrator::*;
pub use quota::*;
pub use settings::*;
pub use storage::{StorageProvisioner, StorageRecord, StorageUsage};
pub use store::*;
pub use tenant::*;
pub use tenant_config::{ConfigProvisioner, ConfigRecord};

use std::path::PathBuf;
use thiserror::Error;

/// Provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("Invalid database strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Tenant already provisioned: {0}")]
    AlreadyProvisioned(String),

    #[error("Table prefix '{prefix}' overlaps with prefix of tenant {tenant_id}")]
    PrefixConflict { prefix: String, tenant_id: String },

    #[error("Another operation is in progress for tenant: {0}")]
    OperationInProgress(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{component} step timed out after {seconds}s")]
    StepTimeout { component: Component, seconds: u64 },

    #[error("{component} reported status '{state}' after provisioning")]
    PostValidation {
        component: Component,
        state: ComponentState,
    },

    #[error("Provisioning failed for tenant {tenant_id}: {source}")]
    ProvisioningFailed {
        tenant_id: String,
        #[source]
        source: Box<ProvisionError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error was raised before any resource was touched
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingField(_)
                | Self::InvalidTenantId(_)
                | Self::InvalidStrategy(_)
                | Self::InvalidIdentifier(_)
                | Self::InvalidPath(_)
                | Self::AlreadyProvisioned(_)
                | Self::PrefixConflict { .. }
                | Self::OperationInProgress(_)
        )
    }
}

impl From<sqlx::Error> for ProvisionError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
