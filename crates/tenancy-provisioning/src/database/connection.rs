//! Database connection capability

use crate::{ProvisionError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Executor, Row as _};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// One result row, each column rendered as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(pub Vec<Option<String>>);

impl Row {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|v| v.as_deref())
    }
}

/// Raw SQL execution against one database
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a statement, returning affected rows
    async fn exec(&self, sql: &str) -> Result<u64>;

    /// Run a query
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// A connection to another database on the same server
    async fn with_database(&self, database: &str) -> Result<Arc<dyn DatabaseConnection>>;

    /// Release pooled connections
    async fn close(&self) {}
}

/// Logical connection names mapped to connections
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<dyn DatabaseConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a single connection under `name`
    pub fn single(name: &str, connection: Arc<dyn DatabaseConnection>) -> Self {
        let registry = Self::new();
        registry.register(name, connection);
        registry
    }

    pub fn register(&self, name: &str, connection: Arc<dyn DatabaseConnection>) {
        self.connections.write().insert(name.to_string(), connection);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DatabaseConnection>> {
        self.connections.read().get(name).cloned().ok_or_else(|| {
            ProvisionError::Database(format!("Unknown database connection: {}", name))
        })
    }
}

/// PostgreSQL connection over a sqlx pool
#[derive(Clone)]
pub struct PostgresConnection {
    pool: PgPool,
    options: PgConnectOptions,
}

impl PostgresConnection {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options.clone())
            .await?;

        Ok(Self { pool, options })
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn exec(&self, sql: &str) -> Result<u64> {
        debug!(sql = %sql, "Executing statement");
        let result = self.pool.execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        debug!(sql = %sql, "Running query");
        let rows = self.pool.fetch_all(sql).await?;

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<Option<String>, _>(i))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map(Row)
                    .map_err(ProvisionError::from)
            })
            .collect()
    }

    async fn with_database(&self, database: &str) -> Result<Arc<dyn DatabaseConnection>> {
        let options = self.options.clone().database(database);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options.clone())
            .await?;

        Ok(Arc::new(Self { pool, options }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
