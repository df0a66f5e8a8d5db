//! Append-only provisioning log

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningLogEntry {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub tenant_id: String,
    pub message: String,
    pub datetime: DateTime<Utc>,
}

/// Audit trail of provisioning steps, kept until explicitly cleared
#[derive(Debug, Default)]
pub struct ProvisioningLog {
    entries: Mutex<Vec<ProvisioningLogEntry>>,
}

impl ProvisioningLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and mirror it to tracing
    pub fn record(&self, tenant_id: &str, message: impl Into<String>) {
        let message = message.into();
        let now = Utc::now();

        info!(tenant_id = %tenant_id, "{}", message);

        self.entries.lock().push(ProvisioningLogEntry {
            timestamp: now.timestamp(),
            tenant_id: tenant_id.to_string(),
            message,
            datetime: now,
        });
    }

    pub fn get_log(&self) -> Vec<ProvisioningLogEntry> {
        self.entries.lock().clone()
    }

    pub fn get_tenant_log(&self, tenant_id: &str) -> Vec<ProvisioningLogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
