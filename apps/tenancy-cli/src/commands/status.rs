//! Status command

use anyhow::Result;
use tenancy_provisioning::{ComponentStatus, ProvisioningStatus, StatusDetails, TenantProvisioner};

use crate::output::{self, OutputFormat};

pub async fn run(provisioner: &TenantProvisioner, id: &str, format: OutputFormat) -> Result<bool> {
    let status = provisioner.get_provisioning_status(id).await?;

    match output::format_structured(&status, format)? {
        Some(rendered) => println!("{}", rendered),
        None => print_status(&status),
    }

    Ok(true)
}

pub fn print_status(status: &ProvisioningStatus) {
    output::key_value("Tenant", &status.tenant_id);
    output::key_value(
        "Overall",
        if status.is_ready() { "ready" } else { "provisioning" },
    );

    for component in status.components() {
        print_component(component);
    }
}

fn print_component(status: &ComponentStatus) {
    output::section(status.component.as_str());
    output::key_value("State", &output::state(status.state));

    if let Some(at) = status.provisioned_at {
        output::key_value("Provisioned", &at.to_rfc3339());
    }

    match &status.details {
        StatusDetails::None => {}
        StatusDetails::Database {
            strategy,
            identifier,
            connection,
        } => {
            output::key_value("Strategy", strategy.as_str());
            output::key_value("Identifier", identifier);
            output::key_value("Connection", connection);
        }
        StatusDetails::Storage { path, quota, usage } => {
            output::key_value("Path", &path.display().to_string());
            output::key_value("Quota", quota);
            output::key_value(
                "Used",
                &format!(
                    "{} ({:.2}%)",
                    output::format_size(usage.used_bytes),
                    usage.usage_percent
                ),
            );
            output::dimmed(&format!(
                "{} files, {} directories",
                usage.file_count, usage.directory_count
            ));
        }
        StatusDetails::Config { path, files } => {
            output::key_value("Path", &path.display().to_string());
            output::key_value("Files", &files.join(", "));
        }
    }
}
