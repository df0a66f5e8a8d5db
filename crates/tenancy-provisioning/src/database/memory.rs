//! In-memory database server for testing
//!
//! Understands exactly the statements this crate emits: databases,
//! schemas, tables, users, grants, inserts and the prefix table listing.
//! Statements containing a registered failure fragment are rejected.

use super::connection::{DatabaseConnection, Row};
use crate::{ProvisionError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_DATABASE: &str = "app";
const DEFAULT_SCHEMA: &str = "public";

macro_rules! statement {
    ($name:ident, $pattern:expr) => {
        static $name: Lazy<Regex> =
            Lazy::new(|| Regex::new($pattern).expect("statement pattern compiles"));
    };
}

statement!(CREATE_DATABASE, r#"^CREATE DATABASE "([^"]+)"$"#);
statement!(DROP_DATABASE, r#"^DROP DATABASE IF EXISTS "([^"]+)"$"#);
statement!(CREATE_SCHEMA, r#"^CREATE SCHEMA "([^"]+)"$"#);
statement!(DROP_SCHEMA, r#"^DROP SCHEMA IF EXISTS "([^"]+)" CASCADE$"#);
statement!(
    CREATE_TABLE,
    r#"(?s)^CREATE TABLE IF NOT EXISTS (?:"([^"]+)"\.)?"([^"]+)" \(.*\)$"#
);
statement!(DROP_TABLE, r#"^DROP TABLE IF EXISTS (?:"([^"]+)"\.)?"([^"]+)"$"#);
statement!(CREATE_USER, r#"(?s)^CREATE USER "([^"]+)" WITH PASSWORD '.*'$"#);
statement!(DROP_USER, r#"^DROP USER IF EXISTS "([^"]+)"$"#);
statement!(
    GRANT_DATABASE,
    r#"^GRANT ALL PRIVILEGES ON DATABASE "([^"]+)" TO "([^"]+)"$"#
);
statement!(INSERT, r#"(?s)^INSERT INTO (?:"([^"]+)"\.)?"([^"]+)" "#);
statement!(
    LIST_TABLES,
    r#"^SELECT tablename::text FROM pg_catalog\.pg_tables WHERE schemaname = current_schema\(\) AND tablename LIKE '((?:[^']|'')*)' ESCAPE '\\'$"#
);

#[derive(Debug, Default)]
struct DatabaseState {
    schemas: BTreeMap<String, BTreeSet<String>>,
}

impl DatabaseState {
    fn new() -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert(DEFAULT_SCHEMA.to_string(), BTreeSet::new());
        Self { schemas }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    databases: BTreeMap<String, DatabaseState>,
    users: BTreeSet<String>,
    /// (database, user)
    grants: BTreeSet<(String, String)>,
    statements: Vec<String>,
    failures: Vec<String>,
}

/// In-memory database server, connected to one of its databases
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    server: Arc<Mutex<ServerState>>,
    database: String,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    /// New server with a single `app` database
    pub fn new() -> Self {
        let mut state = ServerState::default();
        state
            .databases
            .insert(DEFAULT_DATABASE.to_string(), DatabaseState::new());

        Self {
            server: Arc::new(Mutex::new(state)),
            database: DEFAULT_DATABASE.to_string(),
        }
    }

    /// Name of the database this handle is connected to
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Reject every later statement containing `fragment`
    pub fn fail_on(&self, fragment: &str) {
        self.server.lock().failures.push(fragment.to_string());
    }

    pub fn clear_failures(&self) {
        self.server.lock().failures.clear();
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.server.lock().databases.contains_key(name)
    }

    /// Whether the connected database has the schema
    pub fn has_schema(&self, name: &str) -> bool {
        self.server
            .lock()
            .databases
            .get(&self.database)
            .map_or(false, |db| db.schemas.contains_key(name))
    }

    /// Tables in the default schema of the connected database
    pub fn tables(&self) -> Vec<String> {
        self.schema_tables(DEFAULT_SCHEMA)
    }

    /// Tables in a schema of the connected database
    pub fn schema_tables(&self, schema: &str) -> Vec<String> {
        self.server
            .lock()
            .databases
            .get(&self.database)
            .and_then(|db| db.schemas.get(schema))
            .map(|tables| tables.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.server.lock().users.contains(name)
    }

    pub fn has_grant(&self, database: &str, user: &str) -> bool {
        self.server
            .lock()
            .grants
            .contains(&(database.to_string(), user.to_string()))
    }

    /// Every statement executed successfully, across all handles
    pub fn statements(&self) -> Vec<String> {
        self.server.lock().statements.clone()
    }

    fn apply(&self, state: &mut ServerState, sql: &str) -> Result<u64> {
        let current = self.database.as_str();

        if let Some(caps) = CREATE_DATABASE.captures(sql) {
            let name = &caps[1];
            if state.databases.contains_key(name) {
                return Err(db_error(format!("database \"{}\" already exists", name)));
            }
            state.databases.insert(name.to_string(), DatabaseState::new());
            return Ok(0);
        }

        if let Some(caps) = DROP_DATABASE.captures(sql) {
            let name = &caps[1];
            if name == current {
                return Err(db_error(format!(
                    "cannot drop the currently open database \"{}\"",
                    name
                )));
            }
            state.databases.remove(name);
            state.grants.retain(|(db, _)| db != name);
            return Ok(0);
        }

        if let Some(caps) = CREATE_USER.captures(sql) {
            let name = &caps[1];
            if !state.users.insert(name.to_string()) {
                return Err(db_error(format!("role \"{}\" already exists", name)));
            }
            return Ok(0);
        }

        if let Some(caps) = DROP_USER.captures(sql) {
            let name = &caps[1];
            if state.grants.iter().any(|(_, user)| user == name) {
                return Err(db_error(format!(
                    "role \"{}\" cannot be dropped because some objects depend on it",
                    name
                )));
            }
            state.users.remove(name);
            return Ok(0);
        }

        if let Some(caps) = GRANT_DATABASE.captures(sql) {
            let (db, user) = (&caps[1], &caps[2]);
            if !state.databases.contains_key(db) {
                return Err(db_error(format!("database \"{}\" does not exist", db)));
            }
            if !state.users.contains(user) {
                return Err(db_error(format!("role \"{}\" does not exist", user)));
            }
            state.grants.insert((db.to_string(), user.to_string()));
            return Ok(0);
        }

        let database = state
            .databases
            .get_mut(current)
            .ok_or_else(|| db_error(format!("database \"{}\" does not exist", current)))?;

        if let Some(caps) = CREATE_SCHEMA.captures(sql) {
            let name = &caps[1];
            if database.schemas.contains_key(name) {
                return Err(db_error(format!("schema \"{}\" already exists", name)));
            }
            database.schemas.insert(name.to_string(), BTreeSet::new());
            return Ok(0);
        }

        if let Some(caps) = DROP_SCHEMA.captures(sql) {
            database.schemas.remove(&caps[1]);
            return Ok(0);
        }

        if let Some(caps) = CREATE_TABLE.captures(sql) {
            let schema = caps.get(1).map_or(DEFAULT_SCHEMA, |m| m.as_str());
            let tables = database
                .schemas
                .get_mut(schema)
                .ok_or_else(|| db_error(format!("schema \"{}\" does not exist", schema)))?;
            tables.insert(caps[2].to_string());
            return Ok(0);
        }

        if let Some(caps) = DROP_TABLE.captures(sql) {
            let schema = caps.get(1).map_or(DEFAULT_SCHEMA, |m| m.as_str());
            if let Some(tables) = database.schemas.get_mut(schema) {
                tables.remove(&caps[2]);
            }
            return Ok(0);
        }

        if let Some(caps) = INSERT.captures(sql) {
            let schema = caps.get(1).map_or(DEFAULT_SCHEMA, |m| m.as_str());
            let exists = database
                .schemas
                .get(schema)
                .map_or(false, |tables| tables.contains(&caps[2]));
            if !exists {
                return Err(db_error(format!("relation \"{}\" does not exist", &caps[2])));
            }
            return Ok(1);
        }

        Err(db_error(format!("unsupported statement: {}", sql)))
    }
}

fn db_error(message: String) -> ProvisionError {
    ProvisionError::Database(message)
}

/// Translate a `LIKE` pattern with `\` as escape character into a regex
fn like_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|e| ProvisionError::Internal(e.to_string()))
}

#[async_trait]
impl DatabaseConnection for InMemoryDatabase {
    async fn exec(&self, sql: &str) -> Result<u64> {
        let mut state = self.server.lock();

        if let Some(fragment) = state.failures.iter().find(|f| sql.contains(f.as_str())) {
            return Err(db_error(format!("injected failure on '{}'", fragment)));
        }

        let affected = self.apply(&mut state, sql)?;
        state.statements.push(sql.to_string());
        debug!(database = %self.database, sql = %sql, "Executed statement");
        Ok(affected)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut state = self.server.lock();

        if let Some(fragment) = state.failures.iter().find(|f| sql.contains(f.as_str())) {
            return Err(db_error(format!("injected failure on '{}'", fragment)));
        }

        let caps = LIST_TABLES
            .captures(sql)
            .ok_or_else(|| db_error(format!("unsupported query: {}", sql)))?;
        let matcher = like_to_regex(&caps[1].replace("''", "'"))?;

        let rows: Vec<Row> = state
            .databases
            .get(&self.database)
            .and_then(|db| db.schemas.get(DEFAULT_SCHEMA))
            .map(|tables| {
                tables
                    .iter()
                    .filter(|t| matcher.is_match(t))
                    .map(|t| Row(vec![Some(t.clone())]))
                    .collect()
            })
            .unwrap_or_default();

        state.statements.push(sql.to_string());
        Ok(rows)
    }

    async fn with_database(&self, database: &str) -> Result<Arc<dyn DatabaseConnection>> {
        if !self.has_database(database) {
            return Err(db_error(format!("database \"{}\" does not exist", database)));
        }

        Ok(Arc::new(Self {
            server: Arc::clone(&self.server),
            database: database.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sql::{self, Ident};

    #[tokio::test]
    async fn test_like_escaping_matters() {
        let db = InMemoryDatabase::new();
        db.exec("CREATE TABLE IF NOT EXISTS \"acme_users\" (id INT)")
            .await
            .unwrap();
        db.exec("CREATE TABLE IF NOT EXISTS \"acme2_users\" (id INT)")
            .await
            .unwrap();

        let rows = db.query(&sql::list_tables_with_prefix("acme_")).await.unwrap();
        let names: Vec<_> = rows.iter().filter_map(|r| r.get(0)).collect();
        assert_eq!(names, vec!["acme_users"]);

        let unescaped = like_to_regex("acme_%").unwrap();
        assert!(unescaped.is_match("acme2_users"));
    }

    #[tokio::test]
    async fn test_database_lifecycle() {
        let db = InMemoryDatabase::new();
        let name = Ident::new("acme_db").unwrap();
        let user = Ident::new("acme_db_user").unwrap();

        db.exec(&sql::create_database(&name)).await.unwrap();
        assert!(db.exec(&sql::create_database(&name)).await.is_err());
        db.exec(&sql::create_user(&user, "s3cr'et")).await.unwrap();
        db.exec(&sql::grant_all_on_database(&name, &user))
            .await
            .unwrap();
        assert!(db.has_grant("acme_db", "acme_db_user"));

        let scoped = db.with_database("acme_db").await.unwrap();
        scoped
            .exec("CREATE TABLE IF NOT EXISTS \"users\" (id INT)")
            .await
            .unwrap();
        assert!(db.tables().is_empty());

        assert!(db.exec(&sql::drop_user(&user)).await.is_err());
        db.exec(&sql::drop_database(&name)).await.unwrap();
        db.exec(&sql::drop_user(&user)).await.unwrap();
        assert!(!db.has_database("acme_db"));
        assert!(!db.has_user("acme_db_user"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let db = InMemoryDatabase::new();
        db.fail_on("CREATE SCHEMA");

        let schema = Ident::new("acme").unwrap();
        assert!(db.exec(&sql::create_schema(&schema)).await.is_err());
        assert!(!db.has_schema("acme"));

        db.clear_failures();
        db.exec(&sql::create_schema(&schema)).await.unwrap();
        assert!(db.has_schema("acme"));
    }
}
