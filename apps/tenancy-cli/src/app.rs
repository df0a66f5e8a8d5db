//! Provisioner wiring from settings

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tenancy_provisioning::{
    ConnectionRegistry, DatabaseConnection, InMemoryDatabase, PostgresConnection,
    ProvisioningSettings, TenantProvisioner,
};
use tracing::{info, warn};

/// Load settings from a file (with environment overrides) or the environment alone
pub fn load_settings(path: Option<&Path>) -> Result<ProvisioningSettings> {
    match path {
        Some(path) => ProvisioningSettings::load_from_file(&path.to_string_lossy())
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => ProvisioningSettings::load().context("Failed to load settings from environment"),
    }
}

pub async fn build_provisioner(settings: ProvisioningSettings) -> Result<TenantProvisioner> {
    let connection: Arc<dyn DatabaseConnection> = match &settings.database.url {
        Some(url) => {
            info!("Connecting to database");
            Arc::new(
                PostgresConnection::connect(url)
                    .await
                    .context("Failed to connect to database")?,
            )
        }
        None => {
            warn!("No database URL configured (TENANCY__DATABASE__URL); using an in-memory database");
            Arc::new(InMemoryDatabase::new())
        }
    };

    if settings.state.path.is_none() {
        warn!("No state path configured (TENANCY__STATE__PATH); provisioning records last for this run only");
    }

    let registry = ConnectionRegistry::single(&settings.database.default_connection, connection);
    Ok(TenantProvisioner::from_settings(settings, registry))
}
