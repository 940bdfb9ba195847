//! Physical connection seam
//!
//! The pool never speaks a wire protocol itself. It asks a [`Driver`] for a
//! [`DriverConnection`] and drives everything else through that trait, so the
//! Postgres implementation in [`crate::connection`] can be swapped for a
//! scripted one in tests.

use crate::Result;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;

/// Everything a driver needs to open one physical connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Host name, IP address, or Unix socket directory
    pub host: String,
    /// Port
    pub port: u16,
    /// User name
    pub username: String,
    /// Password
    pub password: Option<String>,
    /// Database to open
    pub database: String,
    /// Extra startup parameters
    pub options: BTreeMap<String, String>,
    /// Ask for a long-lived socket
    pub persistent: bool,
}

impl ConnectTarget {
    /// `user@host:port`, used in logs and telemetry
    pub fn identity(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// SQL flavour of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    MySql,
}

impl Dialect {
    /// Statements that open the root transaction
    pub fn begin_statements(self) -> &'static [&'static str] {
        match self {
            Dialect::Postgres => &["BEGIN"],
            Dialect::MySql => &["SET AUTOCOMMIT=0", "START TRANSACTION"],
        }
    }

    /// Statements that commit the root transaction
    pub fn commit_statements(self) -> &'static [&'static str] {
        match self {
            Dialect::Postgres => &["COMMIT"],
            Dialect::MySql => &["COMMIT", "SET AUTOCOMMIT=1"],
        }
    }

    /// Statements that roll back the root transaction
    pub fn rollback_statements(self) -> &'static [&'static str] {
        match self {
            Dialect::Postgres => &["ROLLBACK"],
            Dialect::MySql => &["ROLLBACK", "SET AUTOCOMMIT=1"],
        }
    }

    /// Create a savepoint
    pub fn savepoint(self, name: &str) -> String {
        format!("SAVEPOINT {}", name)
    }

    /// Release (commit) a savepoint
    pub fn release_savepoint(self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {}", name)
    }

    /// Roll back to a savepoint
    pub fn rollback_to_savepoint(self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", name)
    }

    /// `value` as a quoted string literal
    pub fn quote_literal(self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        for c in value.chars() {
            match c {
                '\'' => out.push_str("''"),
                '\\' if self == Dialect::MySql => out.push_str("\\\\"),
                c => out.push(c),
            }
        }
        out.push('\'');
        out
    }
}

/// Rows returned by a statement, in text form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Column names
    pub columns: Vec<String>,
    /// Rows; `None` is SQL NULL
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were returned
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }
}

/// Raw outcome of one executed statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// Rows, when the statement produced a row description
    pub rows: Option<ResultSet>,
    /// Rows inserted, updated or deleted (or returned)
    pub affected_rows: u64,
    /// Generated key of the last inserted row, when the backend reports one
    pub last_insert_id: Option<i64>,
}

/// Opens physical connections
pub trait Driver: Send + Sync + 'static {
    /// Open and authenticate a connection to `target`
    fn connect<'a>(
        &'a self,
        target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn DriverConnection>>>;
}

/// One open physical connection
pub trait DriverConnection: Send + 'static {
    /// SQL flavour spoken by this connection
    fn dialect(&self) -> Dialect;

    /// Run one statement
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Execution>>;

    /// Lightweight liveness round-trip
    fn ping(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Set the session character encoding
    fn set_charset<'a>(&'a mut self, charset: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Switch the session's current database
    fn select_database<'a>(&'a mut self, database: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Close the socket
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

impl fmt::Debug for dyn DriverConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConnection")
            .field("dialect", &self.dialect())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_identity() {
        let target = ConnectTarget {
            host: "10.0.0.1".into(),
            port: 5433,
            username: "app".into(),
            password: None,
            database: "shop".into(),
            options: BTreeMap::new(),
            persistent: false,
        };
        assert_eq!(target.identity(), "app@10.0.0.1:5433");
    }

    #[test]
    fn test_dialect_statements() {
        assert_eq!(Dialect::Postgres.begin_statements(), &["BEGIN"]);
        assert_eq!(
            Dialect::MySql.commit_statements(),
            &["COMMIT", "SET AUTOCOMMIT=1"]
        );
        assert_eq!(
            Dialect::Postgres.rollback_to_savepoint("sp_1"),
            "ROLLBACK TO SAVEPOINT sp_1"
        );
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(Dialect::Postgres.quote_literal("o'neil"), "'o''neil'");
        assert_eq!(Dialect::Postgres.quote_literal(r"a\b"), r"'a\b'");
        assert_eq!(Dialect::MySql.quote_literal(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_result_set_get() {
        let rs = ResultSet {
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec![Some("1".into()), None]],
        };
        assert_eq!(rs.get(0, "id"), Some("1"));
        assert_eq!(rs.get(0, "name"), None);
        assert_eq!(rs.get(1, "id"), None);
        assert_eq!(rs.len(), 1);
    }
}
