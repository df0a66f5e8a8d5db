//! Provisioning settings and per-call options

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level provisioning configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningSettings {
    #[serde(default = "default_true")]
    pub validation_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub config: ConfigSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub state: StateSettings,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            validation_enabled: true,
            auto_rollback: true,
            step_timeout_secs: None,
            storage: StorageSettings::default(),
            config: ConfigSettings::default(),
            database: DatabaseSettings::default(),
            state: StateSettings::default(),
        }
    }
}

impl ProvisioningSettings {
    /// Load settings from `TENANCY__*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("TENANCY")
    }

    /// Load settings from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let config = Self::with_defaults(Config::builder())?
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load settings from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Self::with_defaults(Config::builder())?
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("TENANCY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("validation_enabled", true)?
            .set_default("auto_rollback", true)?
            .set_default("storage.base_path", "storage")?
            .set_default("storage.tenant_dir", "tenants")?
            .set_default("storage.default_quota", "1GB")?
            .set_default("config.config_path", "config/tenants")?
            .set_default("config.generate_env_file", true)?
            .set_default("database.default_connection", "default")?
            .set_default("database.run_migrations", true)?
            .set_default("database.seed_data", false)?
            .set_default("database.create_user", false)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

/// Storage provisioning settings
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default = "default_tenant_dir")]
    pub tenant_dir: String,
    #[serde(default = "default_quota")]
    pub default_quota: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            tenant_dir: default_tenant_dir(),
            default_quota: default_quota(),
        }
    }
}

/// Configuration-artifact settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSettings {
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_true")]
    pub generate_env_file: bool,
}

impl Default for ConfigSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            generate_env_file: true,
        }
    }
}

/// Database provisioning settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Server URL; unset means an in-memory database
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_connection")]
    pub default_connection: String,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    #[serde(default)]
    pub seed_data: bool,
    #[serde(default)]
    pub create_user: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            default_connection: default_connection(),
            run_migrations: true,
            seed_data: false,
            create_user: false,
        }
    }
}

/// Where provisioning records are kept
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateSettings {
    /// Directory for durable records; unset keeps records in memory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> PathBuf {
    PathBuf::from("storage")
}

fn default_tenant_dir() -> String {
    "tenants".to_string()
}

fn default_quota() -> String {
    "1GB".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config/tenants")
}

fn default_connection() -> String {
    "default".to_string()
}

/// Options for a single provisioning call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// Validate tenant data before provisioning
    pub validate: bool,
    /// Roll back completed steps when a later step fails
    pub auto_rollback: bool,
    /// Create baseline tables
    pub run_migrations: bool,
    /// Insert baseline settings rows
    pub seed_data: bool,
    /// Create a scoped user for `separate` databases
    pub create_database_user: bool,
    /// Write the `.env` artifact
    pub generate_env_file: bool,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self::from_settings(&ProvisioningSettings::default())
    }
}

impl ProvisionOptions {
    pub fn from_settings(settings: &ProvisioningSettings) -> Self {
        Self {
            validate: settings.validation_enabled,
            auto_rollback: settings.auto_rollback,
            run_migrations: settings.database.run_migrations,
            seed_data: settings.database.seed_data,
            create_database_user: settings.database.create_user,
            generate_env_file: settings.config.generate_env_file,
        }
    }

    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn without_rollback(mut self) -> Self {
        self.auto_rollback = false;
        self
    }

    pub fn with_seed_data(mut self) -> Self {
        self.seed_data = true;
        self
    }

    pub fn with_database_user(mut self) -> Self {
        self.create_database_user = true;
        self
    }

    pub fn without_migrations(mut self) -> Self {
        self.run_migrations = false;
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.generate_env_file = false;
        self
    }
}

/// Options for deprovisioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeprovisionOptions {
    /// Copy tenant data into a timestamped backup before removal
    pub backup: bool,
}

impl DeprovisionOptions {
    pub fn with_backup() -> Self {
        Self { backup: true }
    }
}
