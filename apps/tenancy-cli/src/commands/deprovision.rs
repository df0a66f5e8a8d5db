//! Deprovision command

use anyhow::Result;
use tenancy_provisioning::{DeprovisionOptions, TenantProvisioner};

use crate::output::{self, OutputFormat};

pub async fn run(
    provisioner: &TenantProvisioner,
    id: &str,
    backup: bool,
    format: OutputFormat,
) -> Result<bool> {
    let options = DeprovisionOptions { backup };
    let report = provisioner.deprovision(id, &options).await?;

    if let Some(rendered) = output::format_structured(&report, format)? {
        println!("{}", rendered);
        return Ok(report.success);
    }

    for outcome in &report.components {
        match &outcome.error {
            None => output::success(&format!("{} removed", outcome.component)),
            Some(error) => output::error(&format!("{} failed: {}", outcome.component, error)),
        }
    }

    if report.success {
        output::success(&format!("Deprovisioned tenant {}", report.tenant_id));
    } else {
        output::warning(&format!(
            "Tenant {} partially deprovisioned; re-run to retry the failed components",
            report.tenant_id
        ));
    }

    Ok(report.success)
}
