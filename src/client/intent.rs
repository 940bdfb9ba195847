//! Pre-built queries

use crate::pool::ConnectionEntry;
use crate::router::Route;
use crate::Result;

/// A query that knows where it wants to run and how to render itself
///
/// [`Database::execute_intent`](super::Database::execute_intent) acquires the
/// connection first and hands it to [`QueryIntent::compile`], so rendering can
/// depend on the connection's dialect.
pub trait QueryIntent: Send + Sync {
    /// Intended cluster; reads go to the replica unless overridden
    fn route(&self) -> Route {
        Route::Slave
    }

    /// Render the SQL to send over `conn`
    fn compile(&self, conn: &ConnectionEntry) -> Result<String>;
}

/// SQL text with an explicit route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQuery {
    sql: String,
    route: Route,
}

impl RawQuery {
    /// Read statement, sent to the replica
    pub fn read(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            route: Route::Slave,
        }
    }

    /// Write statement, sent to the master
    pub fn write(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            route: Route::Master,
        }
    }

    /// Statement sent to `route`
    pub fn on(sql: impl Into<String>, route: impl Into<Route>) -> Self {
        Self {
            sql: sql.into(),
            route: route.into(),
        }
    }
}

impl QueryIntent for RawQuery {
    fn route(&self) -> Route {
        self.route.clone()
    }

    fn compile(&self, _conn: &ConnectionEntry) -> Result<String> {
        Ok(self.sql.clone())
    }
}

/// `SELECT <columns> FROM <table> WHERE <column> = <value>`, with the value
/// quoted for the connection's dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectBy {
    table: String,
    columns: Vec<String>,
    column: String,
    value: String,
}

impl SelectBy {
    /// Select `columns` of `table` where `column` equals `value`
    pub fn new<I, S>(table: &str, columns: I, column: &str, value: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.to_string(),
            columns: columns.into_iter().map(Into::into).collect(),
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}

impl QueryIntent for SelectBy {
    fn compile(&self, conn: &ConnectionEntry) -> Result<String> {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        Ok(format!(
            "SELECT {} FROM {} WHERE {} = {}",
            columns,
            self.table,
            self.column,
            conn.dialect().quote_literal(&self.value)
        ))
    }
}
