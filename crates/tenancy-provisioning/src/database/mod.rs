//! Database provisioning
//!
//! Creates per-tenant database isolation with one of three strategies:
//! - `separate`: a dedicated database, optionally with a scoped user
//! - `schema`: a dedicated schema in the shared database
//! - `prefix`: prefixed tables in the shared database

mod connection;
mod memory;
pub mod sql;

pub use connection::{ConnectionRegistry, DatabaseConnection, PostgresConnection, Row};
pub use memory::InMemoryDatabase;

use crate::{
    Component, ComponentProvisioner, ComponentStatus, DatabaseStrategy, DeprovisionOptions,
    InMemoryRecordStore, ProvisionError, ProvisionOptions, RecordState, RecordStore, Result,
    StatusDetails, TenantDescriptor,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sql::Ident;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const BASELINE_TABLES: &[&str] = &["users", "settings"];
const PASSWORD_LENGTH: usize = 32;

/// Scoped database user created for a `separate` tenant database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseUser {
    pub name: String,
    pub password: String,
}

impl DatabaseUser {
    /// `{database}_user` with a random alphanumeric password
    fn generate(database: &Ident) -> Self {
        Self {
            name: format!("{}_user", database.as_str()),
            password: rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(PASSWORD_LENGTH)
                .map(char::from)
                .collect(),
        }
    }
}

/// Tracking record for a tenant's database resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub strategy: DatabaseStrategy,
    /// Database, schema or table prefix, depending on the strategy
    pub identifier: String,
    /// Logical connection name
    pub connection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<DatabaseUser>,
    pub state: RecordState,
    pub provisioned_at: DateTime<Utc>,
}

/// Names and connection checked for one tenant
struct Assignment {
    ident: Ident,
    tables: Vec<Ident>,
    conn: Arc<dyn DatabaseConnection>,
}

/// Provisions per-tenant database isolation
pub struct DatabaseProvisioner {
    connections: ConnectionRegistry,
    records: Arc<dyn RecordStore<DatabaseRecord>>,
}

impl DatabaseProvisioner {
    pub fn new(
        connections: ConnectionRegistry,
        records: Arc<dyn RecordStore<DatabaseRecord>>,
    ) -> Self {
        Self {
            connections,
            records,
        }
    }

    /// Provisioner over a single `default` connection with in-memory records
    pub fn in_memory(connection: Arc<dyn DatabaseConnection>) -> Self {
        Self::new(
            ConnectionRegistry::single("default", connection),
            Arc::new(InMemoryRecordStore::new()),
        )
    }

    /// Tracking record for a tenant
    pub async fn record(&self, tenant_id: &str) -> Result<Option<DatabaseRecord>> {
        self.records.get(tenant_id).await
    }

    /// Refuse identifiers already assigned to another tenant on the same
    /// connection. Table prefixes must be disjoint: neither may start with
    /// the other, or a wildcard drop for one would hit the other's tables.
    async fn ensure_identifier_available(
        &self,
        tenant_id: &str,
        strategy: DatabaseStrategy,
        identifier: &str,
        connection: &str,
    ) -> Result<()> {
        for (other_id, record) in self.records.list().await? {
            if other_id == tenant_id
                || record.strategy != strategy
                || record.connection != connection
            {
                continue;
            }

            match strategy {
                DatabaseStrategy::Prefix => {
                    if record.identifier.starts_with(identifier)
                        || identifier.starts_with(&record.identifier)
                    {
                        return Err(ProvisionError::PrefixConflict {
                            prefix: identifier.to_string(),
                            tenant_id: other_id,
                        });
                    }
                }
                DatabaseStrategy::Separate | DatabaseStrategy::Schema => {
                    if record.identifier == identifier {
                        return Err(ProvisionError::InvalidIdentifier(format!(
                            "{} '{}' is already assigned to tenant {}",
                            strategy, identifier, other_id
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Check every name the tenant would use, without creating anything.
    ///
    /// A table prefix must also be unused on the server: tables already
    /// carrying it belong to someone else, and a later rollback would drop
    /// them with the tenant's own.
    async fn check_assignment(&self, tenant: &TenantDescriptor) -> Result<Assignment> {
        let db_config = &tenant.database_config;
        let strategy = db_config.strategy;
        let identifier = db_config.identifier(&tenant.id);

        let ident = Ident::new(&identifier)?;
        let tables = baseline_table_names(strategy, &identifier)?;
        self.ensure_identifier_available(&tenant.id, strategy, &identifier, &db_config.connection)
            .await?;

        let conn = self.connections.get(&db_config.connection)?;
        if strategy == DatabaseStrategy::Prefix {
            ensure_prefix_unused(conn.as_ref(), &identifier).await?;
        }

        Ok(Assignment {
            ident,
            tables,
            conn,
        })
    }

    async fn provision_inner(
        &self,
        tenant: &TenantDescriptor,
        options: &ProvisionOptions,
    ) -> Result<()> {
        let db_config = &tenant.database_config;
        let strategy = db_config.strategy;
        let Assignment {
            ident,
            tables,
            conn,
        } = self.check_assignment(tenant).await?;

        let mut record = DatabaseRecord {
            strategy,
            identifier: ident.as_str().to_string(),
            connection: db_config.connection.clone(),
            user: None,
            state: RecordState::Provisioning,
            provisioned_at: Utc::now(),
        };

        match strategy {
            DatabaseStrategy::Separate => {
                conn.exec(&sql::create_database(&ident)).await?;
                self.records.put(&tenant.id, record.clone()).await?;

                if options.create_database_user {
                    let user = DatabaseUser::generate(&ident);
                    let user_ident = Ident::new(&user.name)?;
                    conn.exec(&sql::create_user(&user_ident, &user.password))
                        .await?;

                    // Recorded before the grant so rollback drops the role too.
                    record.user = Some(user);
                    self.records.put(&tenant.id, record.clone()).await?;

                    conn.exec(&sql::grant_all_on_database(&ident, &user_ident))
                        .await?;
                }

                if options.run_migrations || options.seed_data {
                    let scoped = conn.with_database(ident.as_str()).await?;
                    let result =
                        migrate_and_seed(scoped.as_ref(), None, &tables, tenant, options).await;
                    scoped.close().await;
                    result?;
                }
            }
            DatabaseStrategy::Schema => {
                conn.exec(&sql::create_schema(&ident)).await?;
                self.records.put(&tenant.id, record.clone()).await?;

                migrate_and_seed(conn.as_ref(), Some(&ident), &tables, tenant, options).await?;
            }
            DatabaseStrategy::Prefix => {
                self.records.put(&tenant.id, record.clone()).await?;

                migrate_and_seed(conn.as_ref(), None, &tables, tenant, options).await?;
            }
        }

        record.state = RecordState::Ready;
        self.records.put(&tenant.id, record).await?;
        Ok(())
    }

    async fn deprovision_inner(&self, tenant_id: &str, record: &DatabaseRecord) -> Result<()> {
        let conn = self.connections.get(&record.connection)?;

        match record.strategy {
            DatabaseStrategy::Separate => {
                conn.exec(&sql::drop_database(&Ident::new(&record.identifier)?))
                    .await?;
                if let Some(user) = &record.user {
                    conn.exec(&sql::drop_user(&Ident::new(&user.name)?)).await?;
                }
            }
            DatabaseStrategy::Schema => {
                conn.exec(&sql::drop_schema(&Ident::new(&record.identifier)?))
                    .await?;
            }
            DatabaseStrategy::Prefix => {
                let prefix = record.identifier.as_str();
                let rows = conn.query(&sql::list_tables_with_prefix(prefix)).await?;

                for name in rows.iter().filter_map(|row| row.get(0)) {
                    if !name.starts_with(prefix) {
                        warn!(tenant_id = %tenant_id, table = %name, "Skipping table outside tenant prefix");
                        continue;
                    }
                    conn.exec(&sql::drop_table(None, &Ident::new(name)?)).await?;
                    debug!(tenant_id = %tenant_id, table = %name, "Dropped tenant table");
                }
            }
        }

        self.records.delete(tenant_id).await
    }
}

/// Table names for the baseline migration under a strategy
fn baseline_table_names(strategy: DatabaseStrategy, identifier: &str) -> Result<Vec<Ident>> {
    let prefix = match strategy {
        DatabaseStrategy::Prefix => identifier,
        DatabaseStrategy::Separate | DatabaseStrategy::Schema => "",
    };

    BASELINE_TABLES
        .iter()
        .map(|table| Ident::new(&format!("{}{}", prefix, table)))
        .collect()
}

fn baseline_ddl(schema: Option<&Ident>, users: &Ident, settings: &Ident) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             id BIGSERIAL PRIMARY KEY,\n    \
             name VARCHAR(255) NOT NULL,\n    \
             email VARCHAR(255) NOT NULL UNIQUE,\n    \
             password VARCHAR(255),\n    \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    \
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\n)",
            sql::table(schema, users)
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             id BIGSERIAL PRIMARY KEY,\n    \
             key VARCHAR(255) NOT NULL UNIQUE,\n    \
             value TEXT,\n    \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    \
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\n)",
            sql::table(schema, settings)
        ),
    ]
}

async fn migrate_and_seed(
    conn: &dyn DatabaseConnection,
    schema: Option<&Ident>,
    tables: &[Ident],
    tenant: &TenantDescriptor,
    options: &ProvisionOptions,
) -> Result<()> {
    let [users, settings] = tables else {
        return Err(ProvisionError::Internal(
            "baseline migration expects users and settings tables".to_string(),
        ));
    };

    if options.run_migrations {
        for statement in baseline_ddl(schema, users, settings) {
            conn.exec(&statement).await?;
        }
        debug!(tenant_id = %tenant.id, "Ran baseline migration");
    }

    if options.seed_data {
        let statement = format!(
            "INSERT INTO {} (\"key\", \"value\") VALUES ({}, {}), ({}, {}) ON CONFLICT (\"key\") DO NOTHING",
            sql::table(schema, settings),
            sql::literal("tenant.id"),
            sql::literal(&tenant.id),
            sql::literal("tenant.name"),
            sql::literal(&tenant.name),
        );
        conn.exec(&statement).await?;
        debug!(tenant_id = %tenant.id, "Seeded baseline settings");
    }

    Ok(())
}

/// Refuse a table prefix that existing tables already start with
async fn ensure_prefix_unused(conn: &dyn DatabaseConnection, prefix: &str) -> Result<()> {
    let rows = conn.query(&sql::list_tables_with_prefix(prefix)).await?;
    let existing: Vec<&str> = rows
        .iter()
        .filter_map(|row| row.get(0))
        .filter(|name| name.starts_with(prefix))
        .collect();

    if existing.is_empty() {
        return Ok(());
    }

    Err(ProvisionError::InvalidIdentifier(format!(
        "table prefix '{}' is already used by existing tables: {}",
        prefix,
        existing.join(", ")
    )))
}

#[async_trait]
impl ComponentProvisioner for DatabaseProvisioner {
    fn component(&self) -> Component {
        Component::Database
    }

    async fn preflight(&self, tenant: &TenantDescriptor, _options: &ProvisionOptions) -> Result<()> {
        self.check_assignment(tenant).await.map(|_| ())
    }

    async fn provision(&self, tenant: &TenantDescriptor, options: &ProvisionOptions) -> Result<()> {
        info!(
            tenant_id = %tenant.id,
            strategy = %tenant.database_config.strategy,
            connection = %tenant.database_config.connection,
            "Provisioning tenant database"
        );

        self.provision_inner(tenant, options).await.map_err(|e| {
            error!(tenant_id = %tenant.id, error = %e, "Database provisioning failed");
            e
        })?;

        info!(tenant_id = %tenant.id, "Tenant database ready");
        Ok(())
    }

    async fn deprovision(&self, tenant_id: &str, options: &DeprovisionOptions) -> Result<()> {
        let Some(record) = self.records.get(tenant_id).await? else {
            debug!(tenant_id = %tenant_id, "No database record, nothing to deprovision");
            return Ok(());
        };

        if options.backup {
            warn!(
                tenant_id = %tenant_id,
                strategy = %record.strategy,
                "Database dumps are delegated to external tooling; dropping without a dump"
            );
        }

        warn!(
            tenant_id = %tenant_id,
            strategy = %record.strategy,
            identifier = %record.identifier,
            "Dropping tenant database resources (destructive operation)"
        );

        self.deprovision_inner(tenant_id, &record).await.map_err(|e| {
            error!(tenant_id = %tenant_id, error = %e, "Database deprovisioning failed; record retained");
            e
        })?;

        info!(tenant_id = %tenant_id, "Tenant database removed");
        Ok(())
    }

    async fn status(&self, tenant_id: &str) -> Result<ComponentStatus> {
        let Some(record) = self.records.get(tenant_id).await? else {
            return Ok(ComponentStatus::not_provisioned(Component::Database));
        };

        Ok(ComponentStatus {
            component: Component::Database,
            state: record.state.into(),
            provisioned_at: Some(record.provisioned_at),
            details: StatusDetails::Database {
                strategy: record.strategy,
                identifier: record.identifier,
                connection: record.connection,
            },
        })
    }
}
