//! Tenant descriptors
//!
//! Raw tenant data as supplied by callers, its validation, and the
//! resolved descriptor every provisioner consumes.

use crate::{quota::QuotaValue, ProvisionError, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component as PathComponent, Path};
use std::str::FromStr;

static TENANT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\-_]+$").expect("tenant id pattern compiles"));

/// Ids that collide with directories the provisioners manage themselves
const RESERVED_TENANT_IDS: &[&str] = &["backups"];

/// Config key listing extra storage directories for a tenant
pub const STORAGE_DIRECTORIES_KEY: &str = "storage.directories";

/// Feature granted to every active tenant
pub const BASIC_ACCESS_FEATURE: &str = "basic_access";

/// Tenant status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Tenant is active and operational
    Active,
    /// Tenant is pending activation
    Pending,
    /// Tenant is suspended (e.g., payment issues)
    Suspended,
    /// Tenant is disabled by admin
    Disabled,
    /// Tenant is marked for deletion
    Deleted,
}

impl Default for TenantStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Suspended => "suspended",
            Self::Disabled => "disabled",
            Self::Deleted => "deleted",
        }
    }
}

/// Database isolation strategy. Exactly one is active per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseStrategy {
    /// Dedicated database per tenant
    Separate,
    /// Dedicated schema inside the shared database
    Schema,
    /// Prefixed tables inside the shared database
    Prefix,
}

impl Default for DatabaseStrategy {
    fn default() -> Self {
        Self::Prefix
    }
}

impl DatabaseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Separate => "separate",
            Self::Schema => "schema",
            Self::Prefix => "prefix",
        }
    }
}

impl FromStr for DatabaseStrategy {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "separate" => Ok(Self::Separate),
            "schema" => Ok(Self::Schema),
            "prefix" => Ok(Self::Prefix),
            other => Err(ProvisionError::InvalidStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for DatabaseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved database configuration of a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub strategy: DatabaseStrategy,
    /// Logical connection name
    pub connection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl DatabaseConfig {
    pub fn database_name(&self, tenant_id: &str) -> String {
        self.database
            .clone()
            .unwrap_or_else(|| format!("{}_db", tenant_id))
    }

    pub fn schema_name(&self, tenant_id: &str) -> String {
        self.schema.clone().unwrap_or_else(|| tenant_id.to_string())
    }

    pub fn table_prefix(&self, tenant_id: &str) -> String {
        self.prefix
            .clone()
            .unwrap_or_else(|| format!("{}_", tenant_id))
    }

    /// Name of the object the active strategy provisions
    pub fn identifier(&self, tenant_id: &str) -> String {
        match self.strategy {
            DatabaseStrategy::Separate => self.database_name(tenant_id),
            DatabaseStrategy::Schema => self.schema_name(tenant_id),
            DatabaseStrategy::Prefix => self.table_prefix(tenant_id),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub prefix: String,
    pub ttl_multiplier: f64,
    pub driver: String,
}

/// Resource quotas, keyed by resource name (`storage`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuotas {
    #[serde(default)]
    pub quotas: BTreeMap<String, QuotaValue>,
}

impl ResourceQuotas {
    pub fn storage(&self) -> Option<&QuotaValue> {
        self.quotas.get("storage")
    }
}

/// Raw database configuration as supplied by callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDatabaseConfig {
    pub strategy: Option<String>,
    pub connection: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub prefix: Option<String>,
}

/// Raw cache configuration as supplied by callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCacheConfig {
    pub prefix: Option<String>,
    pub ttl_multiplier: Option<f64>,
    pub driver: Option<String>,
}

/// Unvalidated tenant data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TenantData {
    pub id: Option<String>,
    pub name: Option<String>,
    pub status: Option<TenantStatus>,
    pub domain: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub database_config: Option<RawDatabaseConfig>,
    pub cache_config: Option<RawCacheConfig>,
    pub resource_quotas: Option<ResourceQuotas>,
    pub metadata: HashMap<String, Value>,
    pub config: HashMap<String, Value>,
}

impl TenantData {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.database_config
            .get_or_insert_with(Default::default)
            .strategy = Some(strategy.to_string());
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.database_config
            .get_or_insert_with(Default::default)
            .prefix = Some(prefix.to_string());
        self
    }

    pub fn with_storage_quota(mut self, quota: &str) -> Self {
        self.resource_quotas
            .get_or_insert_with(Default::default)
            .quotas
            .insert("storage".to_string(), QuotaValue::Human(quota.to_string()));
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.metadata
            .insert("features".to_string(), serde_json::json!(features));
        self
    }

    pub fn with_directories(mut self, directories: &[&str]) -> Self {
        self.config.insert(
            STORAGE_DIRECTORIES_KEY.to_string(),
            serde_json::json!(directories),
        );
        self
    }
}

/// Validate raw tenant data before anything is provisioned
pub fn validate_tenant_data(data: &TenantData) -> Result<()> {
    let id = data
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProvisionError::MissingField("id".to_string()))?;

    if data.name.as_deref().map_or(true, str::is_empty) {
        return Err(ProvisionError::MissingField("name".to_string()));
    }

    validate_tenant_id(id)
}

/// Check a tenant id against the allowed character set and reserved names
pub fn validate_tenant_id(id: &str) -> Result<()> {
    if !TENANT_ID_PATTERN.is_match(id) {
        return Err(ProvisionError::InvalidTenantId(format!(
            "'{}' must match ^[a-zA-Z0-9-_]+$",
            id
        )));
    }

    if RESERVED_TENANT_IDS.contains(&id) {
        return Err(ProvisionError::InvalidTenantId(format!(
            "'{}' is reserved",
            id
        )));
    }

    Ok(())
}

fn validate_relative_dir(dir: &str) -> Result<()> {
    let path = Path::new(dir);
    let safe = !dir.is_empty()
        && path
            .components()
            .all(|c| matches!(c, PathComponent::Normal(_)));

    if safe {
        Ok(())
    } else {
        Err(ProvisionError::InvalidPath(format!(
            "storage directory '{}' must be a relative path without '..'",
            dir
        )))
    }
}

/// Immutable description of a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDescriptor {
    pub id: String,
    pub name: String,
    pub status: TenantStatus,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub database_config: DatabaseConfig,
    pub cache_config: CacheConfig,
    pub resource_quotas: ResourceQuotas,
    pub metadata: HashMap<String, Value>,
    pub config: HashMap<String, Value>,
}

impl TenantDescriptor {
    /// Build a descriptor from raw data.
    ///
    /// Fails on a missing id or name, an unknown database strategy, or an
    /// unsafe custom storage directory. Format checks on the id live in
    /// [`validate_tenant_data`].
    pub fn from_data(data: TenantData, default_connection: &str) -> Result<Self> {
        let id = data
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProvisionError::MissingField("id".to_string()))?;
        let name = data
            .name
            .ok_or_else(|| ProvisionError::MissingField("name".to_string()))?;

        let raw_db = data.database_config.unwrap_or_default();
        let strategy = match raw_db.strategy.as_deref() {
            Some(s) => s.parse()?,
            None => DatabaseStrategy::default(),
        };

        let raw_cache = data.cache_config.unwrap_or_default();
        let cache_config = CacheConfig {
            prefix: raw_cache
                .prefix
                .unwrap_or_else(|| format!("tenant_{}:", id)),
            ttl_multiplier: raw_cache.ttl_multiplier.unwrap_or(1.0),
            driver: raw_cache.driver.unwrap_or_else(|| "redis".to_string()),
        };

        let descriptor = Self {
            database_config: DatabaseConfig {
                strategy,
                connection: raw_db
                    .connection
                    .unwrap_or_else(|| default_connection.to_string()),
                database: raw_db.database,
                schema: raw_db.schema,
                prefix: raw_db.prefix,
            },
            cache_config,
            status: data.status.unwrap_or_default(),
            domain: data.domain,
            created_at: data.created_at.unwrap_or_else(Utc::now),
            resource_quotas: data.resource_quotas.unwrap_or_default(),
            metadata: data.metadata,
            config: data.config,
            id,
            name,
        };

        for dir in descriptor.custom_directories() {
            validate_relative_dir(&dir)?;
        }

        Ok(descriptor)
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    /// Features from metadata, plus `basic_access` for active tenants
    pub fn features(&self) -> Vec<String> {
        let mut features: Vec<String> = self
            .metadata
            .get("features")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if self.is_active() && !features.iter().any(|f| f == BASIC_ACCESS_FEATURE) {
            features.push(BASIC_ACCESS_FEATURE.to_string());
        }

        features
    }

    /// Extra storage directories declared under `storage.directories`
    pub fn custom_directories(&self) -> Vec<String> {
        self.config
            .get(STORAGE_DIRECTORIES_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Storage quota, falling back to `default` when none is declared
    pub fn storage_quota(&self, default: &str) -> QuotaValue {
        self.resource_quotas
            .storage()
            .cloned()
            .unwrap_or_else(|| QuotaValue::Human(default.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tenant_id() {
        assert!(validate_tenant_id("acme").is_ok());
        assert!(validate_tenant_id("acme-2_b").is_ok());
        assert!(matches!(
            validate_tenant_id("bad id!"),
            Err(ProvisionError::InvalidTenantId(_))
        ));
        assert!(validate_tenant_id("../etc").is_err());
        assert!(validate_tenant_id("backups").is_err());
    }

    #[test]
    fn test_missing_fields() {
        let mut data = TenantData::new("acme", "Acme Inc");
        data.name = None;
        assert!(matches!(
            validate_tenant_data(&data),
            Err(ProvisionError::MissingField(f)) if f == "name"
        ));

        let data = TenantData {
            name: Some("Acme".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            validate_tenant_data(&data),
            Err(ProvisionError::MissingField(f)) if f == "id"
        ));
    }

    #[test]
    fn test_descriptor_defaults() {
        let tenant = TenantDescriptor::from_data(TenantData::new("acme", "Acme Inc"), "default")
            .unwrap();

        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(tenant.database_config.strategy, DatabaseStrategy::Prefix);
        assert_eq!(tenant.database_config.connection, "default");
        assert_eq!(tenant.database_config.identifier("acme"), "acme_");
        assert_eq!(tenant.database_config.database_name("acme"), "acme_db");
        assert_eq!(tenant.database_config.schema_name("acme"), "acme");
        assert_eq!(tenant.cache_config.prefix, "tenant_acme:");
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let data = TenantData::new("acme", "Acme").with_strategy("sharded");
        assert!(matches!(
            TenantDescriptor::from_data(data, "default"),
            Err(ProvisionError::InvalidStrategy(s)) if s == "sharded"
        ));
    }

    #[test]
    fn test_strategy_parsing_is_case_insensitive() {
        assert_eq!(
            "Separate".parse::<DatabaseStrategy>().unwrap(),
            DatabaseStrategy::Separate
        );
        assert_eq!(
            " schema ".parse::<DatabaseStrategy>().unwrap(),
            DatabaseStrategy::Schema
        );
    }

    #[test]
    fn test_features_accumulate() {
        let tenant = TenantDescriptor::from_data(
            TenantData::new("acme", "Acme").with_features(&["reports"]),
            "default",
        )
        .unwrap();
        assert_eq!(tenant.features(), vec!["reports", BASIC_ACCESS_FEATURE]);

        let suspended = TenantDescriptor::from_data(
            TenantData::new("acme", "Acme")
                .with_features(&["reports"])
                .with_status(TenantStatus::Suspended),
            "default",
        )
        .unwrap();
        assert_eq!(suspended.features(), vec!["reports"]);
    }

    #[test]
    fn test_custom_directories_must_be_relative() {
        let ok = TenantDescriptor::from_data(
            TenantData::new("acme", "Acme").with_directories(&["media/avatars"]),
            "default",
        )
        .unwrap();
        assert_eq!(ok.custom_directories(), vec!["media/avatars"]);

        for bad in ["../escape", "/abs", ""] {
            let result = TenantDescriptor::from_data(
                TenantData::new("acme", "Acme").with_directories(&[bad]),
                "default",
            );
            assert!(matches!(result, Err(ProvisionError::InvalidPath(_))), "{bad}");
        }
    }

    #[test]
    fn test_descriptor_from_json() {
        let data: TenantData = serde_json::from_value(serde_json::json!({
            "id": "acme",
            "name": "Acme Inc",
            "databaseConfig": {"strategy": "schema", "schema": "acme_space"},
            "resourceQuotas": {"quotas": {"storage": "5GB"}},
            "cacheConfig": {"driver": "memory"}
        }))
        .unwrap();

        let tenant = TenantDescriptor::from_data(data, "default").unwrap();
        assert_eq!(tenant.database_config.strategy, DatabaseStrategy::Schema);
        assert_eq!(tenant.database_config.identifier("acme"), "acme_space");
        assert_eq!(tenant.cache_config.driver, "memory");
        assert_eq!(
            tenant.storage_quota("1GB"),
            QuotaValue::Human("5GB".to_string())
        );
    }
}
