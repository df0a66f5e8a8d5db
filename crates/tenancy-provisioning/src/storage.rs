//! Storage provisioning
//!
//! Each tenant gets a directory tree under `{base_path}/{tenant_dir}/{id}`
//! with quota metadata. Usage is recomputed from disk on every status call.

use crate::{
    fs::{backup_dir_name, Filesystem, LocalFilesystem},
    Component, ComponentProvisioner, ComponentStatus, ComponentState, DeprovisionOptions,
    InMemoryRecordStore, ProvisionError, ProvisionOptions, RecordState, RecordStore, Result,
    StatusDetails, StorageSettings, TenantDescriptor,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Standard directories created for every tenant, with permission bits
const STANDARD_DIRECTORIES: &[(&str, u32)] = &[
    ("uploads", 0o755),
    ("cache", 0o755),
    ("temp", 0o700),
    ("logs", 0o755),
    ("backups", 0o700),
    ("exports", 0o755),
    ("imports", 0o755),
];

const DEFAULT_DIR_MODE: u32 = 0o755;
const BACKUP_DIR_MODE: u32 = 0o700;

const STORAGE_CONFIG_FILE: &str = ".storage_config.json";
const QUOTA_FILE: &str = ".quota";
const BACKUP_INFO_FILE: &str = "backup_info.json";

/// Tracking record for a tenant's storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub path: PathBuf,
    /// Quota as declared (`"5GB"`, `"1024"`)
    pub quota: String,
    pub quota_bytes: u64,
    pub directories: Vec<String>,
    pub state: RecordState,
    pub provisioned_at: DateTime<Utc>,
}

/// Live disk usage of a tenant tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub file_count: u64,
    pub directory_count: u64,
    pub quota_bytes: u64,
    /// Percentage of quota used, 0 when the quota is unset or unparseable
    pub usage_percent: f64,
}

impl StorageUsage {
    fn compute(entries: &[crate::FsEntry], quota_bytes: u64) -> Self {
        let mut usage = Self {
            quota_bytes,
            ..Default::default()
        };

        for entry in entries {
            if entry.is_dir {
                usage.directory_count += 1;
            } else {
                usage.file_count += 1;
                usage.used_bytes += entry.len;
            }
        }

        if quota_bytes > 0 {
            let percent = usage.used_bytes as f64 / quota_bytes as f64 * 100.0;
            usage.usage_percent = (percent * 100.0).round() / 100.0;
        }

        usage
    }
}

/// Provisions per-tenant storage trees
pub struct StorageProvisioner {
    fs: Arc<dyn Filesystem>,
    records: Arc<dyn RecordStore<StorageRecord>>,
    base_path: PathBuf,
    tenant_dir: String,
    default_quota: String,
}

impl StorageProvisioner {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        records: Arc<dyn RecordStore<StorageRecord>>,
        settings: &StorageSettings,
    ) -> Self {
        Self {
            fs,
            records,
            base_path: settings.base_path.clone(),
            tenant_dir: settings.tenant_dir.clone(),
            default_quota: settings.default_quota.clone(),
        }
    }

    /// Local disk with in-memory records
    pub fn local(settings: &StorageSettings) -> Self {
        Self::new(
            Arc::new(LocalFilesystem::new()),
            Arc::new(InMemoryRecordStore::new()),
            settings,
        )
    }

    /// Root of a tenant's tree
    pub fn tenant_path(&self, tenant_id: &str) -> PathBuf {
        self.base_path.join(&self.tenant_dir).join(tenant_id)
    }

    /// Directory holding storage backups
    pub fn backup_root(&self) -> PathBuf {
        self.base_path.join("backups")
    }

    pub async fn record(&self, tenant_id: &str) -> Result<Option<StorageRecord>> {
        self.records.get(tenant_id).await
    }

    /// Current usage of a provisioned tenant tree
    pub async fn usage(&self, tenant_id: &str) -> Result<Option<StorageUsage>> {
        let Some(record) = self.records.get(tenant_id).await? else {
            return Ok(None);
        };
        if !self.fs.exists(&record.path).await {
            return Ok(None);
        }

        let entries = self.fs.walk(&record.path).await?;
        Ok(Some(StorageUsage::compute(&entries, record.quota_bytes)))
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> Result<()> {
        self.fs.create_dir_all(path).await?;
        self.fs.set_permissions(path, mode).await
    }

    async fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.fs.write(path, &bytes).await
    }

    /// An unmanaged directory must never be adopted, or rollback would delete it.
    async fn ensure_root_absent(&self, tenant_id: &str) -> Result<PathBuf> {
        let root = self.tenant_path(tenant_id);
        if self.fs.exists(&root).await {
            return Err(ProvisionError::AlreadyProvisioned(format!(
                "{} (storage directory {} already exists)",
                tenant_id,
                root.display()
            )));
        }
        Ok(root)
    }

    async fn provision_inner(&self, tenant: &TenantDescriptor) -> Result<()> {
        let root = self.ensure_root_absent(&tenant.id).await?;

        let quota = tenant.storage_quota(&self.default_quota);
        let quota_bytes = quota.to_bytes();
        if quota_bytes == 0 {
            warn!(tenant_id = %tenant.id, quota = %quota, "Storage quota did not parse; recording 0 bytes");
        }

        let mut directories: Vec<(String, u32)> = STANDARD_DIRECTORIES
            .iter()
            .map(|(name, mode)| (name.to_string(), *mode))
            .collect();
        for custom in tenant.custom_directories() {
            if !directories.iter().any(|(name, _)| *name == custom) {
                directories.push((custom, DEFAULT_DIR_MODE));
            }
        }

        self.create_dir(&root, DEFAULT_DIR_MODE).await?;

        let mut record = StorageRecord {
            path: root.clone(),
            quota: quota.to_string(),
            quota_bytes,
            directories: directories.iter().map(|(name, _)| name.clone()).collect(),
            state: RecordState::Provisioning,
            provisioned_at: Utc::now(),
        };
        self.records.put(&tenant.id, record.clone()).await?;

        for (name, mode) in &directories {
            self.create_dir(&root.join(name), *mode).await?;
            debug!(tenant_id = %tenant.id, directory = %name, mode = format!("{:o}", mode), "Created storage directory");
        }

        let now = Utc::now();
        self.write_json(
            &root.join(STORAGE_CONFIG_FILE),
            &json!({
                "tenant_id": tenant.id,
                "tenant_name": tenant.name,
                "quota": record.quota,
                "quota_bytes": quota_bytes,
                "created_at": now,
                "directories": record.directories,
            }),
        )
        .await?;

        self.write_json(
            &root.join(QUOTA_FILE),
            &json!({
                "quota_bytes": quota_bytes,
                "quota": record.quota,
                "monitoring_enabled": true,
                "last_check": now,
            }),
        )
        .await?;

        record.state = RecordState::Ready;
        self.records.put(&tenant.id, record).await
    }

    async fn backup(&self, tenant_id: &str, record: &StorageRecord) -> Result<PathBuf> {
        let backup_dir = self.backup_root().join(backup_dir_name(tenant_id));
        self.create_dir(&backup_dir, BACKUP_DIR_MODE).await?;

        let files_copied = self
            .fs
            .copy_tree(&record.path, &backup_dir.join("files"))
            .await?;

        self.write_json(
            &backup_dir.join(BACKUP_INFO_FILE),
            &json!({
                "tenant_id": tenant_id,
                "source": record.path,
                "quota": record.quota,
                "files_copied": files_copied,
                "created_at": Utc::now(),
            }),
        )
        .await?;

        info!(tenant_id = %tenant_id, backup = %backup_dir.display(), files = files_copied, "Backed up tenant storage");
        Ok(backup_dir)
    }

    async fn deprovision_inner(
        &self,
        tenant_id: &str,
        record: &StorageRecord,
        options: &DeprovisionOptions,
    ) -> Result<()> {
        let exists = self.fs.exists(&record.path).await;

        // Best effort: a failed backup is logged and removal goes ahead.
        if options.backup && exists {
            if let Err(e) = self.backup(tenant_id, record).await {
                warn!(tenant_id = %tenant_id, error = %e, "Storage backup failed; removing without a backup");
            }
        }

        if exists {
            self.fs.remove_tree(&record.path).await?;
        }

        self.records.delete(tenant_id).await
    }
}

#[async_trait]
impl ComponentProvisioner for StorageProvisioner {
    fn component(&self) -> Component {
        Component::Storage
    }

    async fn preflight(&self, tenant: &TenantDescriptor, _options: &ProvisionOptions) -> Result<()> {
        self.ensure_root_absent(&tenant.id).await.map(|_| ())
    }

    async fn provision(&self, tenant: &TenantDescriptor, _options: &ProvisionOptions) -> Result<()> {
        info!(tenant_id = %tenant.id, path = %self.tenant_path(&tenant.id).display(), "Provisioning tenant storage");

        self.provision_inner(tenant).await.map_err(|e| {
            error!(tenant_id = %tenant.id, error = %e, "Storage provisioning failed");
            e
        })?;

        info!(tenant_id = %tenant.id, "Tenant storage ready");
        Ok(())
    }

    async fn deprovision(&self, tenant_id: &str, options: &DeprovisionOptions) -> Result<()> {
        let Some(record) = self.records.get(tenant_id).await? else {
            debug!(tenant_id = %tenant_id, "No storage record, nothing to deprovision");
            return Ok(());
        };

        warn!(tenant_id = %tenant_id, path = %record.path.display(), "Removing tenant storage (destructive operation)");

        self.deprovision_inner(tenant_id, &record, options)
            .await
            .map_err(|e| {
                error!(tenant_id = %tenant_id, error = %e, "Storage deprovisioning failed; record retained");
                e
            })?;

        info!(tenant_id = %tenant_id, "Tenant storage removed");
        Ok(())
    }

    async fn status(&self, tenant_id: &str) -> Result<ComponentStatus> {
        let Some(record) = self.records.get(tenant_id).await? else {
            return Ok(ComponentStatus::not_provisioned(Component::Storage));
        };

        let (state, usage) = if !self.fs.exists(&record.path).await {
            (ComponentState::Degraded, StorageUsage::default())
        } else {
            let entries = self.fs.walk(&record.path).await?;
            (
                record.state.into(),
                StorageUsage::compute(&entries, record.quota_bytes),
            )
        };

        Ok(ComponentStatus {
            component: Component::Storage,
            state,
            provisioned_at: Some(record.provisioned_at),
            details: StatusDetails::Storage {
                path: record.path,
                quota: record.quota,
                usage,
            },
        })
    }
}
