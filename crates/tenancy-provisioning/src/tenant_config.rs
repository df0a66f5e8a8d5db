//! Configuration artifact provisioning
//!
//! Generates per-tenant JSON configuration files (and optionally a `.env`
//! file) under `{config_path}/{id}`.

use crate::{
    fs::{backup_dir_name, Filesystem, LocalFilesystem},
    Component, ComponentProvisioner, ComponentStatus, ComponentState, ConfigSettings,
    DatabaseStrategy, DeprovisionOptions, InMemoryRecordStore, ProvisionError, ProvisionOptions,
    RecordState, RecordStore, Result, StatusDetails, TenantDescriptor,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const ENV_FILE: &str = ".env";

/// Tracking record for a tenant's configuration directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub path: PathBuf,
    /// Files found in the directory after generation
    pub files: Vec<String>,
    pub state: RecordState,
    pub provisioned_at: DateTime<Utc>,
}

/// Provisions per-tenant configuration artifacts
pub struct ConfigProvisioner {
    fs: Arc<dyn Filesystem>,
    records: Arc<dyn RecordStore<ConfigRecord>>,
    config_path: PathBuf,
}

impl ConfigProvisioner {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        records: Arc<dyn RecordStore<ConfigRecord>>,
        settings: &ConfigSettings,
    ) -> Self {
        Self {
            fs,
            records,
            config_path: settings.config_path.clone(),
        }
    }

    /// Local disk with in-memory records
    pub fn local(settings: &ConfigSettings) -> Self {
        Self::new(
            Arc::new(LocalFilesystem::new()),
            Arc::new(InMemoryRecordStore::new()),
            settings,
        )
    }

    pub fn tenant_path(&self, tenant_id: &str) -> PathBuf {
        self.config_path.join(tenant_id)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.config_path.join("backups")
    }

    pub async fn record(&self, tenant_id: &str) -> Result<Option<ConfigRecord>> {
        self.records.get(tenant_id).await
    }

    async fn ensure_dir_absent(&self, tenant_id: &str) -> Result<PathBuf> {
        let dir = self.tenant_path(tenant_id);
        if self.fs.exists(&dir).await {
            return Err(ProvisionError::AlreadyProvisioned(format!(
                "{} (config directory {} already exists)",
                tenant_id,
                dir.display()
            )));
        }
        Ok(dir)
    }

    async fn provision_inner(
        &self,
        tenant: &TenantDescriptor,
        options: &ProvisionOptions,
    ) -> Result<()> {
        let dir = self.ensure_dir_absent(&tenant.id).await?;
        self.fs.create_dir_all(&dir).await?;

        let mut record = ConfigRecord {
            path: dir.clone(),
            files: Vec::new(),
            state: RecordState::Provisioning,
            provisioned_at: Utc::now(),
        };
        self.records.put(&tenant.id, record.clone()).await?;

        for (name, document) in artifacts(tenant) {
            let bytes = serde_json::to_vec_pretty(&document)?;
            self.fs.write(&dir.join(name), &bytes).await?;
            debug!(tenant_id = %tenant.id, file = %name, "Wrote config artifact");
        }

        if options.generate_env_file {
            self.fs
                .write(&dir.join(ENV_FILE), env_file(tenant).as_bytes())
                .await?;
        }

        record.files = self.fs.list_files(&dir).await?;
        record.state = RecordState::Ready;
        self.records.put(&tenant.id, record).await
    }

    async fn deprovision_inner(
        &self,
        tenant_id: &str,
        record: &ConfigRecord,
        options: &DeprovisionOptions,
    ) -> Result<()> {
        let exists = self.fs.exists(&record.path).await;

        if options.backup && exists {
            let backup_dir = self.backup_root().join(backup_dir_name(tenant_id));
            match self.fs.copy_tree(&record.path, &backup_dir).await {
                Ok(copied) => {
                    info!(tenant_id = %tenant_id, backup = %backup_dir.display(), files = copied, "Backed up tenant config")
                }
                Err(e) => {
                    warn!(tenant_id = %tenant_id, error = %e, "Config backup failed; removing without a backup")
                }
            }
        }

        if exists {
            self.fs.remove_tree(&record.path).await?;
        }

        self.records.delete(tenant_id).await
    }
}

/// JSON artifacts written for a tenant, by file name
fn artifacts(tenant: &TenantDescriptor) -> Vec<(&'static str, Value)> {
    let features = tenant.features();
    let flags: Map<String, Value> = features
        .iter()
        .map(|f| (f.clone(), Value::Bool(true)))
        .collect();

    vec![
        (
            "tenant.json",
            json!({
                "id": tenant.id,
                "name": tenant.name,
                "status": tenant.status,
                "domain": tenant.domain,
                "created_at": tenant.created_at,
                "features": features,
                "quotas": tenant.resource_quotas.quotas,
                "metadata": tenant.metadata,
            }),
        ),
        ("database.json", database_document(tenant)),
        (
            "mail.json",
            json!({
                "from_name": tenant.name,
                "from_address": tenant.domain.as_ref().map(|d| format!("noreply@{}", d)),
                "queue": format!("tenant_{}_mail", tenant.id),
            }),
        ),
        (
            "queue.json",
            json!({
                "prefix": format!("tenant_{}_", tenant.id),
                "default_queue": format!("tenant_{}_default", tenant.id),
            }),
        ),
        (
            "storage.json",
            json!({
                "quota": tenant.resource_quotas.storage().map(ToString::to_string),
                "quota_bytes": tenant.resource_quotas.storage().map(|q| q.to_bytes()),
                "directories": tenant.custom_directories(),
            }),
        ),
        (
            "cache.json",
            json!({
                "prefix": tenant.cache_config.prefix,
                "ttl_multiplier": tenant.cache_config.ttl_multiplier,
                "driver": tenant.cache_config.driver,
            }),
        ),
        (
            "logging.json",
            json!({
                "channel": format!("tenant_{}", tenant.id),
                "level": "info",
                "path": format!("logs/tenant_{}.log", tenant.id),
            }),
        ),
        (
            "features.json",
            json!({
                "features": features,
                "flags": flags,
            }),
        ),
    ]
}

fn database_document(tenant: &TenantDescriptor) -> Value {
    let db = &tenant.database_config;
    let identifier = db.identifier(&tenant.id);

    let mut document = json!({
        "strategy": db.strategy,
        "connection": db.connection,
    });

    let (key, migrations_table) = match db.strategy {
        DatabaseStrategy::Separate => ("database", "migrations".to_string()),
        DatabaseStrategy::Schema => ("schema", "migrations".to_string()),
        DatabaseStrategy::Prefix => ("prefix", format!("{}migrations", identifier)),
    };
    document[key] = Value::String(identifier);
    document["migrations_table"] = Value::String(migrations_table);
    document
}

fn env_file(tenant: &TenantDescriptor) -> String {
    let db_prefix = match tenant.database_config.strategy {
        DatabaseStrategy::Prefix => tenant.database_config.table_prefix(&tenant.id),
        DatabaseStrategy::Separate | DatabaseStrategy::Schema => String::new(),
    };

    [
        ("TENANT_ID", tenant.id.as_str()),
        ("TENANT_NAME", tenant.name.as_str()),
        ("TENANT_STATUS", tenant.status.as_str()),
        ("DB_PREFIX", db_prefix.as_str()),
        ("CACHE_PREFIX", tenant.cache_config.prefix.as_str()),
    ]
    .iter()
    .map(|(key, value)| format!("{}={}\n", key, env_value(value)))
    .collect()
}

/// Quote values a dotenv parser would otherwise split or expand
fn env_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '$' | '\\' | '='));

    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[async_trait]
impl ComponentProvisioner for ConfigProvisioner {
    fn component(&self) -> Component {
        Component::Config
    }

    async fn preflight(&self, tenant: &TenantDescriptor, _options: &ProvisionOptions) -> Result<()> {
        self.ensure_dir_absent(&tenant.id).await.map(|_| ())
    }

    async fn provision(&self, tenant: &TenantDescriptor, options: &ProvisionOptions) -> Result<()> {
        info!(tenant_id = %tenant.id, path = %self.tenant_path(&tenant.id).display(), "Generating tenant configuration");

        self.provision_inner(tenant, options).await.map_err(|e| {
            error!(tenant_id = %tenant.id, error = %e, "Config provisioning failed");
            e
        })?;

        info!(tenant_id = %tenant.id, "Tenant configuration ready");
        Ok(())
    }

    async fn deprovision(&self, tenant_id: &str, options: &DeprovisionOptions) -> Result<()> {
        let Some(record) = self.records.get(tenant_id).await? else {
            debug!(tenant_id = %tenant_id, "No config record, nothing to deprovision");
            return Ok(());
        };

        warn!(tenant_id = %tenant_id, path = %record.path.display(), "Removing tenant configuration");

        self.deprovision_inner(tenant_id, &record, options)
            .await
            .map_err(|e| {
                error!(tenant_id = %tenant_id, error = %e, "Config deprovisioning failed; record retained");
                e
            })?;

        info!(tenant_id = %tenant_id, "Tenant configuration removed");
        Ok(())
    }

    async fn status(&self, tenant_id: &str) -> Result<ComponentStatus> {
        let Some(record) = self.records.get(tenant_id).await? else {
            return Ok(ComponentStatus::not_provisioned(Component::Config));
        };

        let state = if self.fs.exists(&record.path).await {
            record.state.into()
        } else {
            ComponentState::Degraded
        };

        Ok(ComponentStatus {
            component: Component::Config,
            state,
            provisioned_at: Some(record.provisioned_at),
            details: StatusDetails::Config {
                path: record.path,
                files: record.files,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TenantData, TenantStatus};
    use tempfile::TempDir;

    fn setup() -> (TempDir, ConfigProvisioner) {
        let tmp = tempfile::tempdir().unwrap();
        let settings = ConfigSettings {
            config_path: tmp.path().join("config/tenants"),
            ..Default::default()
        };
        let provisioner = ConfigProvisioner::local(&settings);
        (tmp, provisioner)
    }

    fn tenant(data: TenantData) -> TenantDescriptor {
        TenantDescriptor::from_data(data, "default").unwrap()
    }

    fn read_json(path: PathBuf) -> Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_generates_artifacts() {
        let (tmp, provisioner) = setup();
        let acme = tenant(
            TenantData::new("acme", "Acme Inc")
                .with_storage_quota("5GB")
                .with_features(&["sso"]),
        );

        provisioner
            .provision(&acme, &ProvisionOptions::default())
            .await
            .unwrap();

        let dir = tmp.path().join("config/tenants/acme");
        let tenant_json = read_json(dir.join("tenant.json"));
        assert_eq!(tenant_json["id"], "acme");
        assert_eq!(tenant_json["features"], json!(["sso", "basic_access"]));

        let features = read_json(dir.join("features.json"));
        assert_eq!(features["flags"]["sso"], true);
        assert_eq!(features["flags"]["basic_access"], true);

        let database = read_json(dir.join("database.json"));
        assert_eq!(database["strategy"], "prefix");
        assert_eq!(database["prefix"], "acme_");
        assert_eq!(database["migrations_table"], "acme_migrations");

        let record = provisioner.record("acme").await.unwrap().unwrap();
        assert_eq!(
            record.files,
            vec![
                ".env",
                "cache.json",
                "database.json",
                "features.json",
                "logging.json",
                "mail.json",
                "queue.json",
                "storage.json",
                "tenant.json",
            ]
        );
    }

    #[tokio::test]
    async fn test_env_file() {
        let (tmp, provisioner) = setup();
        provisioner
            .provision(&tenant(TenantData::new("acme", "Acme Inc")), &ProvisionOptions::default())
            .await
            .unwrap();

        let env = std::fs::read_to_string(tmp.path().join("config/tenants/acme/.env")).unwrap();
        assert!(env.contains("TENANT_ID=acme\n"));
        assert!(env.contains("TENANT_NAME=\"Acme Inc\"\n"));
        assert!(env.contains("TENANT_STATUS=active\n"));
        assert!(env.contains("DB_PREFIX=acme_\n"));
        assert!(env.contains("CACHE_PREFIX=tenant_acme:\n"));
    }

    #[tokio::test]
    async fn test_env_file_disabled() {
        let (tmp, provisioner) = setup();
        provisioner
            .provision(
                &tenant(TenantData::new("acme", "Acme")),
                &ProvisionOptions::default().without_env_file(),
            )
            .await
            .unwrap();

        assert!(!tmp.path().join("config/tenants/acme/.env").exists());
    }

    #[tokio::test]
    async fn test_inactive_tenant_has_no_basic_access() {
        let (tmp, provisioner) = setup();
        provisioner
            .provision(
                &tenant(TenantData::new("acme", "Acme").with_status(TenantStatus::Suspended)),
                &ProvisionOptions::default(),
            )
            .await
            .unwrap();

        let features = read_json(tmp.path().join("config/tenants/acme/features.json"));
        assert_eq!(features["features"], json!([]));
    }

    #[tokio::test]
    async fn test_deprovision_backs_up_whole_tree() {
        let (tmp, provisioner) = setup();
        provisioner
            .provision(&tenant(TenantData::new("acme", "Acme")), &ProvisionOptions::default())
            .await
            .unwrap();

        provisioner
            .deprovision("acme", &DeprovisionOptions::with_backup())
            .await
            .unwrap();
        assert!(!tmp.path().join("config/tenants/acme").exists());

        let backup = std::fs::read_dir(provisioner.backup_root())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert_eq!(read_json(backup.join("tenant.json"))["id"], "acme");
        assert!(backup.join(".env").is_file());
        assert_eq!(
            provisioner.status("acme").await.unwrap().state,
            ComponentState::NotProvisioned
        );
    }

    #[tokio::test]
    async fn test_failed_backup_still_removes_config() {
        let (tmp, provisioner) = setup();
        provisioner
            .provision(&tenant(TenantData::new("acme", "Acme")), &ProvisionOptions::default())
            .await
            .unwrap();
        std::fs::write(provisioner.backup_root(), b"not a directory").unwrap();

        provisioner
            .deprovision("acme", &DeprovisionOptions::with_backup())
            .await
            .unwrap();
        assert!(!tmp.path().join("config/tenants/acme").exists());
        assert!(provisioner.record("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deprovision_without_backup() {
        let (_tmp, provisioner) = setup();
        provisioner
            .provision(&tenant(TenantData::new("acme", "Acme")), &ProvisionOptions::default())
            .await
            .unwrap();

        provisioner
            .deprovision("acme", &DeprovisionOptions::default())
            .await
            .unwrap();
        assert!(!provisioner.backup_root().exists());
    }

    #[test]
    fn test_env_value_quoting() {
        assert_eq!(env_value("plain"), "plain");
        assert_eq!(env_value("Acme \"Big\" Co"), "\"Acme \\\"Big\\\" Co\"");
        assert_eq!(env_value(""), "");
    }
}
