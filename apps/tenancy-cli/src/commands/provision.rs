//! Provision command

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tenancy_provisioning::{ProvisionOptions, TenantData, TenantProvisioner};

use crate::commands::status::print_status;
use crate::output::{self, OutputFormat};

/// Read a tenant descriptor; `.yaml`/`.yml` files are YAML, anything else JSON
fn read_tenant_data(file: &Path) -> Result<TenantData> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let is_yaml = matches!(
        file.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );

    if is_yaml {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid tenant descriptor {}", file.display()))
    } else {
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid tenant descriptor {}", file.display()))
    }
}

pub async fn run(
    provisioner: &TenantProvisioner,
    file: &Path,
    options: &ProvisionOptions,
    format: OutputFormat,
) -> Result<bool> {
    let data = read_tenant_data(file)?;
    let tenant_id = data.id.clone().unwrap_or_default();

    let tenant = match provisioner.provision(data, options).await {
        Ok(tenant) => tenant,
        Err(e) => {
            if format == OutputFormat::Text {
                for entry in provisioner.get_tenant_log(&tenant_id) {
                    output::dimmed(&format!("{} {}", entry.datetime.to_rfc3339(), entry.message));
                }
            }
            return Err(e.into());
        }
    };

    let status = provisioner.get_provisioning_status(&tenant.id).await?;

    match output::format_structured(&json!({ "tenant": tenant, "status": status }), format)? {
        Some(rendered) => println!("{}", rendered),
        None => {
            output::success(&format!("Provisioned tenant {} ({})", tenant.id, tenant.name));
            print_status(&status);
        }
    }

    Ok(true)
}
