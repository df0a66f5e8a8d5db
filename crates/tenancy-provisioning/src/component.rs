//! Provisioning components
//!
//! The three per-tenant resources and the trait each sub-provisioner
//! implements so the orchestrator can sequence them.

use crate::{
    storage::StorageUsage, DatabaseStrategy, DeprovisionOptions, ProvisionOptions, Result,
    TenantDescriptor,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Provisioned resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Database,
    Storage,
    Config,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Storage => "storage",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a tracked component record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Resources are being created; rollback must clean them up
    Provisioning,
    /// Step completed
    Ready,
}

/// Reported state of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// No record exists for the tenant
    NotProvisioned,
    /// A record exists but the step has not finished
    Provisioning,
    /// Step finished and the resource is present
    Ready,
    /// Step finished but the resource has gone missing
    Degraded,
}

impl ComponentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotProvisioned => "not_provisioned",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RecordState> for ComponentState {
    fn from(state: RecordState) -> Self {
        match state {
            RecordState::Provisioning => Self::Provisioning,
            RecordState::Ready => Self::Ready,
        }
    }
}

/// Component-specific status details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusDetails {
    None,
    Database {
        strategy: DatabaseStrategy,
        identifier: String,
        connection: String,
    },
    Storage {
        path: PathBuf,
        quota: String,
        usage: StorageUsage,
    },
    Config {
        path: PathBuf,
        files: Vec<String>,
    },
}

/// Status of one component for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub component: Component,
    pub state: ComponentState,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub details: StatusDetails,
}

impl ComponentStatus {
    pub fn not_provisioned(component: Component) -> Self {
        Self {
            component,
            state: ComponentState::NotProvisioned,
            provisioned_at: None,
            details: StatusDetails::None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ComponentState::Ready
    }
}

/// A sub-provisioner managing one kind of per-tenant resource
#[async_trait]
pub trait ComponentProvisioner: Send + Sync {
    /// Which resource this provisioner manages
    fn component(&self) -> Component;

    /// Check that provisioning can start, touching nothing. Runs for every
    /// component before the first step.
    async fn preflight(&self, _tenant: &TenantDescriptor, _options: &ProvisionOptions) -> Result<()> {
        Ok(())
    }

    /// Create the tenant's resources
    async fn provision(&self, tenant: &TenantDescriptor, options: &ProvisionOptions) -> Result<()>;

    /// Remove the tenant's resources. A tenant without a record is a no-op.
    async fn deprovision(&self, tenant_id: &str, options: &DeprovisionOptions) -> Result<()>;

    /// Undo a failed provisioning. Shares the deprovision path without backup.
    async fn rollback(&self, tenant_id: &str) -> Result<()> {
        self.deprovision(tenant_id, &DeprovisionOptions::default())
            .await
    }

    /// Current status for the tenant
    async fn status(&self, tenant_id: &str) -> Result<ComponentStatus>;
}
