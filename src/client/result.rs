//! Statement result shaping

use crate::driver::{Execution, ResultSet};
use crate::router::StatementKind;

/// What a statement produced, shaped by its kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    /// INSERT or REPLACE
    Inserted {
        /// Generated key, when the backend reports one
        last_insert_id: Option<i64>,
        /// Rows written
        affected_rows: u64,
    },
    /// UPDATE or DELETE
    Affected(u64),
    /// Everything else
    Rows(ResultSet),
}

impl QueryResult {
    pub(crate) fn shape(sql: &str, execution: Execution) -> Self {
        match StatementKind::of(sql) {
            StatementKind::Insert | StatementKind::Replace => QueryResult::Inserted {
                last_insert_id: execution.last_insert_id,
                affected_rows: execution.affected_rows,
            },
            StatementKind::Update | StatementKind::Delete => {
                QueryResult::Affected(execution.affected_rows)
            }
            _ => QueryResult::Rows(execution.rows.unwrap_or_default()),
        }
    }

    /// Rows written, for INSERT, REPLACE, UPDATE and DELETE
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            QueryResult::Inserted { affected_rows, .. } => Some(*affected_rows),
            QueryResult::Affected(n) => Some(*n),
            QueryResult::Rows(_) => None,
        }
    }

    /// Generated key of an INSERT
    pub fn last_insert_id(&self) -> Option<i64> {
        match self {
            QueryResult::Inserted { last_insert_id, .. } => *last_insert_id,
            _ => None,
        }
    }

    /// Rows of a reading statement
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Take the rows, if any
    pub fn into_rows(self) -> Option<ResultSet> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}
