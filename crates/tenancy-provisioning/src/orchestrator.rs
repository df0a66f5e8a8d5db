//! Tenant provisioning orchestrator
//!
//! Sequences the database, storage and config sub-provisioners:
//!
//! - provisioning runs database → storage → config and is all-or-nothing;
//!   on failure the completed work is rolled back config → storage → database
//! - deprovisioning runs database → storage → config, continues past
//!   individual failures and reports per-component outcomes
//!
//! The two directions are separate state machines ([`ProvisioningPhase`] and
//! [`DeprovisionPhase`]); deprovisioning never goes through rollback.

use crate::{
    tenant::validate_tenant_data, Component, ComponentProvisioner, ComponentState,
    ComponentStatus, ConfigProvisioner, ConfigRecord, ConnectionRegistry, DatabaseProvisioner,
    DatabaseRecord, DeprovisionOptions, FileRecordStore, Filesystem, InMemoryRecordStore,
    LocalFilesystem, ProvisionError, ProvisionOptions, ProvisioningLog, ProvisioningLogEntry,
    ProvisioningSettings, RecordStore, Result, StorageProvisioner, StorageRecord, TenantData,
    TenantDescriptor,
};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Progress of a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningPhase {
    Pending,
    DatabaseDone,
    StorageDone,
    ConfigDone,
    Ready,
}

impl ProvisioningPhase {
    fn after(component: Component) -> Self {
        match component {
            Component::Database => Self::DatabaseDone,
            Component::Storage => Self::StorageDone,
            Component::Config => Self::ConfigDone,
        }
    }
}

/// Progress of a deprovisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeprovisionPhase {
    Ready,
    DatabaseRemoved,
    StorageRemoved,
    ConfigRemoved,
    Gone,
}

impl DeprovisionPhase {
    fn after(component: Component) -> Self {
        match component {
            Component::Database => Self::DatabaseRemoved,
            Component::Storage => Self::StorageRemoved,
            Component::Config => Self::ConfigRemoved,
        }
    }
}

/// Result of removing one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentOutcome {
    pub component: Component,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a deprovisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionReport {
    pub tenant_id: String,
    /// Every component was removed
    pub success: bool,
    /// Furthest phase reached without a failure
    pub phase: DeprovisionPhase,
    pub backup: bool,
    pub components: Vec<ComponentOutcome>,
}

impl DeprovisionReport {
    pub fn failures(&self) -> impl Iterator<Item = &ComponentOutcome> {
        self.components.iter().filter(|c| !c.success)
    }
}

/// Aggregate provisioning state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    Ready,
    Provisioning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallStatus {
    pub status: OverallState,
}

/// Status of every component of a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningStatus {
    pub tenant_id: String,
    pub database: ComponentStatus,
    pub storage: ComponentStatus,
    pub config: ComponentStatus,
    pub overall: OverallStatus,
}

impl ProvisioningStatus {
    pub fn is_ready(&self) -> bool {
        self.overall.status == OverallState::Ready
    }

    pub fn components(&self) -> [&ComponentStatus; 3] {
        [&self.database, &self.storage, &self.config]
    }
}

/// Releases a tenant's in-flight slot on drop
struct InFlightGuard<'a> {
    in_flight: &'a DashSet<String>,
    tenant_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.tenant_id);
    }
}

/// Coordinates provisioning of all per-tenant resources
pub struct TenantProvisioner {
    database: Arc<dyn ComponentProvisioner>,
    storage: Arc<dyn ComponentProvisioner>,
    config: Arc<dyn ComponentProvisioner>,
    settings: ProvisioningSettings,
    log: ProvisioningLog,
    in_flight: DashSet<String>,
}

impl TenantProvisioner {
    pub fn new(
        database: Arc<dyn ComponentProvisioner>,
        storage: Arc<dyn ComponentProvisioner>,
        config: Arc<dyn ComponentProvisioner>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            database,
            storage,
            config,
            settings,
            log: ProvisioningLog::new(),
            in_flight: DashSet::new(),
        }
    }

    /// Build the standard provisioners on the local filesystem.
    ///
    /// Records are kept under `state.path` when set, otherwise in memory.
    pub fn from_settings(settings: ProvisioningSettings, connections: ConnectionRegistry) -> Self {
        let fs: Arc<dyn Filesystem> = Arc::new(LocalFilesystem::new());

        let (database_records, storage_records, config_records): (
            Arc<dyn RecordStore<DatabaseRecord>>,
            Arc<dyn RecordStore<StorageRecord>>,
            Arc<dyn RecordStore<ConfigRecord>>,
        ) = match &settings.state.path {
            Some(path) => (
                Arc::new(FileRecordStore::new(path.join("database"))),
                Arc::new(FileRecordStore::new(path.join("storage"))),
                Arc::new(FileRecordStore::new(path.join("config"))),
            ),
            None => (
                Arc::new(InMemoryRecordStore::new()),
                Arc::new(InMemoryRecordStore::new()),
                Arc::new(InMemoryRecordStore::new()),
            ),
        };

        let database = DatabaseProvisioner::new(connections, database_records);
        let storage = StorageProvisioner::new(fs.clone(), storage_records, &settings.storage);
        let config = ConfigProvisioner::new(fs, config_records, &settings.config);

        Self::new(
            Arc::new(database),
            Arc::new(storage),
            Arc::new(config),
            settings,
        )
    }

    pub fn settings(&self) -> &ProvisioningSettings {
        &self.settings
    }

    /// Options derived from the loaded settings
    pub fn default_options(&self) -> ProvisionOptions {
        ProvisionOptions::from_settings(&self.settings)
    }

    fn provisioners(&self) -> [&Arc<dyn ComponentProvisioner>; 3] {
        [&self.database, &self.storage, &self.config]
    }

    fn acquire(&self, tenant_id: &str) -> Result<InFlightGuard<'_>> {
        if !self.in_flight.insert(tenant_id.to_string()) {
            return Err(ProvisionError::OperationInProgress(tenant_id.to_string()));
        }

        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            tenant_id: tenant_id.to_string(),
        })
    }

    /// Provision every resource for a tenant.
    ///
    /// Validation and preflight failures return unwrapped, before anything
    /// is touched. Any later failure rolls back (when enabled) and is
    /// returned as [`ProvisionError::ProvisioningFailed`].
    pub async fn provision(
        &self,
        data: TenantData,
        options: &ProvisionOptions,
    ) -> Result<TenantDescriptor> {
        if options.validate {
            validate_tenant_data(&data)?;
        }
        if let Some(id) = data.id.as_deref() {
            ensure_path_safe(id)?;
        }

        let tenant = TenantDescriptor::from_data(data, &self.settings.database.default_connection)?;
        let _guard = self.acquire(&tenant.id)?;

        if let Some(status) = self.first_existing_component(&tenant.id).await? {
            warn!(tenant_id = %tenant.id, component = %status.component, state = %status.state, "Refusing to provision over existing resources");
            return Err(ProvisionError::AlreadyProvisioned(tenant.id));
        }

        for provisioner in self.provisioners() {
            provisioner.preflight(&tenant, options).await.map_err(|e| {
                warn!(tenant_id = %tenant.id, component = %provisioner.component(), error = %e, "Preflight check failed");
                e
            })?;
        }

        self.log
            .record(&tenant.id, format!("Starting provisioning for tenant {}", tenant.name));

        let mut phase = ProvisioningPhase::Pending;
        match self.run_steps(&tenant, options, &mut phase).await {
            Ok(()) => {
                self.log.record(&tenant.id, "Provisioning completed successfully");
                Ok(tenant)
            }
            Err(e) => {
                error!(tenant_id = %tenant.id, phase = ?phase, error = %e, "Tenant provisioning failed");
                self.log
                    .record(&tenant.id, format!("Provisioning failed: {}", e));

                if options.auto_rollback {
                    self.rollback(&tenant.id).await;
                } else {
                    warn!(tenant_id = %tenant.id, "Automatic rollback disabled; partial resources remain");
                }

                Err(ProvisionError::ProvisioningFailed {
                    tenant_id: tenant.id,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn run_steps(
        &self,
        tenant: &TenantDescriptor,
        options: &ProvisionOptions,
        phase: &mut ProvisioningPhase,
    ) -> Result<()> {
        for provisioner in self.provisioners() {
            let component = provisioner.component();
            self.log
                .record(&tenant.id, format!("Provisioning {}", component));

            self.run_step(&**provisioner, tenant, options).await?;

            *phase = ProvisioningPhase::after(component);
            self.log
                .record(&tenant.id, format!("{} provisioned", component));
        }

        self.log.record(&tenant.id, "Validating provisioned resources");
        for provisioner in self.provisioners() {
            let status = provisioner.status(&tenant.id).await?;
            if !status.is_ready() {
                return Err(ProvisionError::PostValidation {
                    component: status.component,
                    state: status.state,
                });
            }
        }

        *phase = ProvisioningPhase::Ready;
        Ok(())
    }

    async fn run_step(
        &self,
        provisioner: &dyn ComponentProvisioner,
        tenant: &TenantDescriptor,
        options: &ProvisionOptions,
    ) -> Result<()> {
        let step = provisioner.provision(tenant, options);

        match self.settings.step_timeout() {
            Some(limit) => tokio::time::timeout(limit, step).await.map_err(|_| {
                ProvisionError::StepTimeout {
                    component: provisioner.component(),
                    seconds: limit.as_secs(),
                }
            })?,
            None => step.await,
        }
    }

    /// Undo a failed provisioning, config → storage → database.
    /// Failures are logged and do not stop the remaining components.
    async fn rollback(&self, tenant_id: &str) {
        self.log.record(tenant_id, "Rolling back provisioning");

        for provisioner in self.provisioners().into_iter().rev() {
            let component = provisioner.component();
            match provisioner.rollback(tenant_id).await {
                Ok(()) => {
                    self.log
                        .record(tenant_id, format!("Rolled back {}", component));
                }
                Err(e) => {
                    error!(tenant_id = %tenant_id, component = %component, error = %e, "Rollback failed");
                    self.log
                        .record(tenant_id, format!("Rollback of {} failed: {}", component, e));
                }
            }
        }
    }

    async fn first_existing_component(&self, tenant_id: &str) -> Result<Option<ComponentStatus>> {
        for provisioner in self.provisioners() {
            let status = provisioner.status(tenant_id).await?;
            if status.state != ComponentState::NotProvisioned {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    /// Remove every resource of a tenant, database → storage → config.
    ///
    /// Component failures are reported, not returned as errors; the only
    /// error is a concurrent operation on the same tenant.
    pub async fn deprovision(
        &self,
        tenant_id: &str,
        options: &DeprovisionOptions,
    ) -> Result<DeprovisionReport> {
        let _guard = self.acquire(tenant_id)?;

        self.log.record(
            tenant_id,
            format!(
                "Starting deprovisioning (backup: {})",
                if options.backup { "yes" } else { "no" }
            ),
        );

        let mut phase = DeprovisionPhase::Ready;
        let mut components = Vec::with_capacity(3);

        for provisioner in self.provisioners() {
            let component = provisioner.component();

            match provisioner.deprovision(tenant_id, options).await {
                Ok(()) => {
                    if components.iter().all(|c: &ComponentOutcome| c.success) {
                        phase = DeprovisionPhase::after(component);
                    }
                    self.log
                        .record(tenant_id, format!("{} deprovisioned", component));
                    components.push(ComponentOutcome {
                        component,
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(tenant_id = %tenant_id, component = %component, error = %e, "Deprovisioning step failed");
                    self.log
                        .record(tenant_id, format!("Deprovisioning {} failed: {}", component, e));
                    components.push(ComponentOutcome {
                        component,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let success = components.iter().all(|c| c.success);
        if success {
            phase = DeprovisionPhase::Gone;
            self.log.record(tenant_id, "Deprovisioning completed");
        } else {
            warn!(tenant_id = %tenant_id, phase = ?phase, "Deprovisioning incomplete");
        }

        Ok(DeprovisionReport {
            tenant_id: tenant_id.to_string(),
            success,
            phase,
            backup: options.backup,
            components,
        })
    }

    /// Status of each component; overall is ready only if all three are
    pub async fn get_provisioning_status(&self, tenant_id: &str) -> Result<ProvisioningStatus> {
        let database = self.database.status(tenant_id).await?;
        let storage = self.storage.status(tenant_id).await?;
        let config = self.config.status(tenant_id).await?;

        let status = if database.is_ready() && storage.is_ready() && config.is_ready() {
            OverallState::Ready
        } else {
            OverallState::Provisioning
        };

        Ok(ProvisioningStatus {
            tenant_id: tenant_id.to_string(),
            database,
            storage,
            config,
            overall: OverallStatus { status },
        })
    }

    pub fn log(&self) -> &ProvisioningLog {
        &self.log
    }

    pub fn get_log(&self) -> Vec<ProvisioningLogEntry> {
        self.log.get_log()
    }

    pub fn get_tenant_log(&self, tenant_id: &str) -> Vec<ProvisioningLogEntry> {
        self.log.get_tenant_log(tenant_id)
    }

    pub fn clear_log(&self) {
        info!("Clearing provisioning log");
        self.log.clear_log();
    }
}

/// Ids become directory and file names even when validation is skipped
fn ensure_path_safe(id: &str) -> Result<()> {
    let unsafe_id = id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id == "backups";

    if unsafe_id {
        return Err(ProvisionError::InvalidTenantId(format!(
            "'{}' cannot be used as a directory name",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordState, StatusDetails};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Scripted sub-provisioner recording calls into a shared journal
    struct Scripted {
        component: Component,
        journal: Arc<Mutex<Vec<String>>>,
        records: Mutex<std::collections::HashMap<String, RecordState>>,
        fail_provision: bool,
        fail_deprovision: bool,
        stay_provisioning: bool,
        conflict: bool,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn new(component: Component, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                component,
                journal: journal.clone(),
                records: Mutex::new(Default::default()),
                fail_provision: false,
                fail_deprovision: false,
                stay_provisioning: false,
                conflict: false,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ComponentProvisioner for Scripted {
        fn component(&self) -> Component {
            self.component
        }

        async fn preflight(&self, tenant: &TenantDescriptor, _: &ProvisionOptions) -> Result<()> {
            self.journal.lock().push(format!("preflight:{}", self.component));
            if self.conflict {
                return Err(ProvisionError::PrefixConflict {
                    prefix: tenant.database_config.identifier(&tenant.id),
                    tenant_id: "other".to_string(),
                });
            }
            Ok(())
        }

        async fn provision(&self, tenant: &TenantDescriptor, _: &ProvisionOptions) -> Result<()> {
            self.journal.lock().push(format!("provision:{}", self.component));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_provision {
                return Err(ProvisionError::Internal(format!("{} exploded", self.component)));
            }
            let state = if self.stay_provisioning {
                RecordState::Provisioning
            } else {
                RecordState::Ready
            };
            self.records.lock().insert(tenant.id.clone(), state);
            Ok(())
        }

        async fn deprovision(&self, tenant_id: &str, _: &DeprovisionOptions) -> Result<()> {
            self.journal.lock().push(format!("deprovision:{}", self.component));
            if self.fail_deprovision {
                return Err(ProvisionError::Database("drop failed".to_string()));
            }
            self.records.lock().remove(tenant_id);
            Ok(())
        }

        async fn rollback(&self, tenant_id: &str) -> Result<()> {
            self.journal.lock().push(format!("rollback:{}", self.component));
            self.records.lock().remove(tenant_id);
            Ok(())
        }

        async fn status(&self, tenant_id: &str) -> Result<ComponentStatus> {
            Ok(match self.records.lock().get(tenant_id) {
                Some(state) => ComponentStatus {
                    component: self.component,
                    state: (*state).into(),
                    provisioned_at: None,
                    details: StatusDetails::None,
                },
                None => ComponentStatus::not_provisioned(self.component),
            })
        }
    }

    fn orchestrator(
        configure: impl FnOnce(&mut Scripted, &mut Scripted, &mut Scripted),
        settings: ProvisioningSettings,
    ) -> (TenantProvisioner, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut database = Scripted::new(Component::Database, &journal);
        let mut storage = Scripted::new(Component::Storage, &journal);
        let mut config = Scripted::new(Component::Config, &journal);
        configure(&mut database, &mut storage, &mut config);

        let provisioner = TenantProvisioner::new(
            Arc::new(database),
            Arc::new(storage),
            Arc::new(config),
            settings,
        );
        (provisioner, journal)
    }

    fn acme() -> TenantData {
        TenantData::new("acme", "Acme Inc")
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let (provisioner, journal) = orchestrator(|_, _, _| {}, ProvisioningSettings::default());

        let tenant = provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap();
        assert_eq!(tenant.id, "acme");
        assert_eq!(
            *journal.lock(),
            vec![
                "preflight:database",
                "preflight:storage",
                "preflight:config",
                "provision:database",
                "provision:storage",
                "provision:config",
            ]
        );
        assert!(provisioner
            .get_provisioning_status("acme")
            .await
            .unwrap()
            .is_ready());

        let log = provisioner.get_tenant_log("acme");
        assert!(log.first().unwrap().message.starts_with("Starting provisioning"));
        assert_eq!(log.last().unwrap().message, "Provisioning completed successfully");
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let (provisioner, journal) = orchestrator(
            |_, _, config| config.fail_provision = true,
            ProvisioningSettings::default(),
        );

        let err = provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ProvisioningFailed { ref tenant_id, .. } if tenant_id == "acme"));
        assert!(err.to_string().contains("acme"));
        assert!(err.to_string().contains("config exploded"));

        assert_eq!(
            *journal.lock(),
            vec![
                "preflight:database",
                "preflight:storage",
                "preflight:config",
                "provision:database",
                "provision:storage",
                "provision:config",
                "rollback:config",
                "rollback:storage",
                "rollback:database",
            ]
        );
        let status = provisioner.get_provisioning_status("acme").await.unwrap();
        assert!(status
            .components()
            .iter()
            .all(|c| c.state == ComponentState::NotProvisioned));
    }

    #[tokio::test]
    async fn test_rollback_disabled() {
        let (provisioner, journal) = orchestrator(
            |_, storage, _| storage.fail_provision = true,
            ProvisioningSettings::default(),
        );

        let result = provisioner
            .provision(acme(), &ProvisionOptions::default().without_rollback())
            .await;
        assert!(result.is_err());
        assert!(!journal.lock().iter().any(|e| e.starts_with("rollback")));
        assert_eq!(
            provisioner
                .get_provisioning_status("acme")
                .await
                .unwrap()
                .database
                .state,
            ComponentState::Ready
        );
    }

    #[tokio::test]
    async fn test_post_validation_triggers_rollback() {
        let (provisioner, journal) = orchestrator(
            |_, storage, _| storage.stay_provisioning = true,
            ProvisioningSettings::default(),
        );

        let err = provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap_err();
        let ProvisionError::ProvisioningFailed { source, .. } = err else {
            panic!("expected provisioning failure");
        };
        assert!(matches!(
            *source,
            ProvisionError::PostValidation {
                component: Component::Storage,
                state: ComponentState::Provisioning
            }
        ));
        assert!(journal.lock().contains(&"rollback:database".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let settings = ProvisioningSettings {
            step_timeout_secs: Some(5),
            ..Default::default()
        };
        let (provisioner, journal) = orchestrator(
            |_, storage, _| storage.delay = Some(Duration::from_secs(60)),
            settings,
        );

        let err = provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap_err();
        let ProvisionError::ProvisioningFailed { source, .. } = err else {
            panic!("expected provisioning failure");
        };
        assert!(matches!(
            *source,
            ProvisionError::StepTimeout {
                component: Component::Storage,
                seconds: 5
            }
        ));
        assert!(!journal.lock().contains(&"provision:config".to_string()));
    }

    #[tokio::test]
    async fn test_validation_error_touches_nothing() {
        let (provisioner, journal) = orchestrator(|_, _, _| {}, ProvisioningSettings::default());

        let err = provisioner
            .provision(TenantData::new("bad id!", "Bad"), &ProvisionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(journal.lock().is_empty());
        assert!(provisioner.get_log().is_empty());
    }

    #[tokio::test]
    async fn test_preflight_failure_is_returned_before_any_step() {
        let (provisioner, journal) = orchestrator(
            |database, _, _| database.conflict = true,
            ProvisioningSettings::default(),
        );

        let err = provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PrefixConflict { .. }));
        assert!(err.is_validation());
        assert_eq!(*journal.lock(), vec!["preflight:database".to_string()]);
    }

    #[tokio::test]
    async fn test_path_unsafe_id_rejected_without_validation() {
        let (provisioner, journal) = orchestrator(|_, _, _| {}, ProvisioningSettings::default());

        let err = provisioner
            .provision(
                TenantData::new("../etc", "Escape"),
                &ProvisionOptions::default().without_validation(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidTenantId(_)));
        assert!(journal.lock().is_empty());
    }

    #[tokio::test]
    async fn test_already_provisioned_is_rejected_without_rollback() {
        let (provisioner, journal) = orchestrator(|_, _, _| {}, ProvisioningSettings::default());
        provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap();
        journal.lock().clear();

        let err = provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::AlreadyProvisioned(_)));
        assert!(journal.lock().is_empty());
    }

    #[tokio::test]
    async fn test_deprovision_continues_past_failures() {
        let (provisioner, journal) = orchestrator(
            |_, storage, _| storage.fail_deprovision = true,
            ProvisioningSettings::default(),
        );
        provisioner
            .provision(acme(), &ProvisionOptions::default())
            .await
            .unwrap();
        journal.lock().clear();

        let report = provisioner
            .deprovision("acme", &DeprovisionOptions::default())
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.phase, DeprovisionPhase::DatabaseRemoved);
        assert_eq!(
            *journal.lock(),
            vec!["deprovision:database", "deprovision:storage", "deprovision:config"]
        );

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].component, Component::Storage);
        assert!(failures[0].error.as_deref().unwrap().contains("drop failed"));
    }

    #[tokio::test]
    async fn test_deprovision_unknown_tenant_succeeds() {
        let (provisioner, _) = orchestrator(|_, _, _| {}, ProvisioningSettings::default());

        let report = provisioner
            .deprovision("ghost", &DeprovisionOptions::with_backup())
            .await
            .unwrap();
        assert!(report.success);
        assert!(report.backup);
        assert_eq!(report.phase, DeprovisionPhase::Gone);
    }

    #[tokio::test]
    async fn test_concurrent_operation_rejected() {
        let (provisioner, _) = orchestrator(|_, _, _| {}, ProvisioningSettings::default());

        let guard = provisioner.acquire("acme").unwrap();
        let result = provisioner
            .deprovision("acme", &DeprovisionOptions::default())
            .await;
        assert!(matches!(result, Err(ProvisionError::OperationInProgress(_))));

        drop(guard);
        assert!(provisioner
            .deprovision("acme", &DeprovisionOptions::default())
            .await
            .is_ok());
    }

    #[test]
    fn test_ensure_path_safe() {
        assert!(ensure_path_safe("acme").is_ok());
        assert!(ensure_path_safe("..").is_err());
        assert!(ensure_path_safe("a/b").is_err());
        assert!(ensure_path_safe("backups").is_err());
    }
}
