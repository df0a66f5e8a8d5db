//! SQL rendering helpers
//!
//! Names reaching DDL are checked against an allow-list and quoted; string
//! values are rendered as escaped literals.

use crate::{ProvisionError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]{1,63}$").expect("identifier pattern compiles"));

/// A validated, quotable SQL identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: &str) -> Result<Self> {
        if IDENTIFIER.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ProvisionError::InvalidIdentifier(format!(
                "'{}' must match ^[A-Za-z0-9_-]{{1,63}}$",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// Render a string literal with embedded quotes doubled
pub fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `LIKE` pattern matching names that start with `prefix` exactly.
///
/// `_` and `%` in the prefix are escaped (escape character `\`), so
/// `acme_` does not match `acme2_users`.
pub fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 2);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Table name, optionally qualified by schema
pub fn table(schema: Option<&Ident>, name: &Ident) -> String {
    match schema {
        Some(schema) => format!("{}.{}", schema, name),
        None => name.to_string(),
    }
}

pub fn create_database(db: &Ident) -> String {
    format!("CREATE DATABASE {}", db)
}

pub fn drop_database(db: &Ident) -> String {
    format!("DROP DATABASE IF EXISTS {}", db)
}

pub fn create_schema(schema: &Ident) -> String {
    format!("CREATE SCHEMA {}", schema)
}

pub fn drop_schema(schema: &Ident) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", schema)
}

pub fn create_user(user: &Ident, password: &str) -> String {
    format!("CREATE USER {} WITH PASSWORD {}", user, literal(password))
}

pub fn drop_user(user: &Ident) -> String {
    format!("DROP USER IF EXISTS {}", user)
}

pub fn grant_all_on_database(db: &Ident, user: &Ident) -> String {
    format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {}", db, user)
}

pub fn drop_table(schema: Option<&Ident>, name: &Ident) -> String {
    format!("DROP TABLE IF EXISTS {}", table(schema, name))
}

/// Tables of the current schema whose names start with `prefix`
pub fn list_tables_with_prefix(prefix: &str) -> String {
    format!(
        "SELECT tablename::text FROM pg_catalog.pg_tables WHERE schemaname = current_schema() AND tablename LIKE {} ESCAPE '\\'",
        literal(&like_prefix_pattern(prefix))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_validation() {
        assert_eq!(Ident::new("acme_db").unwrap().to_string(), "\"acme_db\"");
        assert!(Ident::new("acme-2").is_ok());
        assert!(Ident::new("").is_err());
        assert!(Ident::new("x\"; DROP TABLE users; --").is_err());
        assert!(Ident::new(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_like_prefix_pattern() {
        assert_eq!(like_prefix_pattern("acme_"), "acme\\_%");
        assert_eq!(like_prefix_pattern("a%b"), "a\\%b%");
    }

    #[test]
    fn test_statements() {
        let schema = Ident::new("acme").unwrap();
        let users = Ident::new("users").unwrap();
        assert_eq!(
            drop_table(Some(&schema), &users),
            "DROP TABLE IF EXISTS \"acme\".\"users\""
        );
        assert_eq!(drop_schema(&schema), "DROP SCHEMA IF EXISTS \"acme\" CASCADE");
        assert!(list_tables_with_prefix("acme_").contains("LIKE 'acme\\_%' ESCAPE '\\'"));
    }
}
