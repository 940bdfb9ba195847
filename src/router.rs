//! Master/replica routing

use std::fmt;

/// Logical routing target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cluster {
    /// Primary; receives every write
    Master,
    /// Read replica
    Slave,
    /// Named alternate outside the master/replica pair
    Named(String),
}

impl Cluster {
    /// Name used in configuration, logs and metrics
    pub fn as_str(&self) -> &str {
        match self {
            Cluster::Master => "master",
            Cluster::Slave => "slave",
            Cluster::Named(name) => name,
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Cluster {
    fn from(name: &str) -> Self {
        match name {
            "master" => Cluster::Master,
            "slave" => Cluster::Slave,
            other => Cluster::Named(other.to_string()),
        }
    }
}

/// Caller's routing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Route {
    /// Decide from the statement shape
    #[default]
    Auto,
    /// Force the master
    Master,
    /// Force the replica
    Slave,
    /// A named cluster
    Named(String),
}

impl From<bool> for Route {
    fn from(force_master: bool) -> Self {
        if force_master {
            Route::Master
        } else {
            Route::Auto
        }
    }
}

impl From<&str> for Route {
    fn from(name: &str) -> Self {
        Route::Named(name.to_string())
    }
}

/// Leading keyword of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT without a locking or INTO clause
    Select,
    /// SELECT ... FOR UPDATE / FOR SHARE / INTO
    LockingSelect,
    /// SHOW, EXPLAIN, DESCRIBE
    Inspect,
    /// INSERT
    Insert,
    /// REPLACE
    Replace,
    /// UPDATE
    Update,
    /// DELETE
    Delete,
    /// Anything else (DDL, WITH, SET, CALL, ...)
    Other,
}

impl StatementKind {
    /// Classify `sql` by its first keyword.
    ///
    /// Leading whitespace, comments and opening parentheses are skipped.
    pub fn of(sql: &str) -> Self {
        let body = skip_noise(sql);
        let keyword: String = body
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" => {
                if has_locking_clause(body) {
                    StatementKind::LockingSelect
                } else {
                    StatementKind::Select
                }
            }
            "SHOW" | "EXPLAIN" | "DESCRIBE" | "DESC" => StatementKind::Inspect,
            "INSERT" => StatementKind::Insert,
            "REPLACE" => StatementKind::Replace,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }

    /// Whether the statement only reads
    pub fn is_read_only(self) -> bool {
        matches!(self, StatementKind::Select | StatementKind::Inspect)
    }
}

fn skip_noise(mut sql: &str) -> &str {
    loop {
        let trimmed = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(rest) = trimmed.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return trimmed;
        }
    }
}

fn has_locking_clause(select: &str) -> bool {
    let words = select
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty());
    let mut prev_for = false;
    for word in words {
        if word.eq_ignore_ascii_case("INTO") {
            return true;
        }
        if prev_for
            && (word.eq_ignore_ascii_case("UPDATE")
                || word.eq_ignore_ascii_case("SHARE")
                || word.eq_ignore_ascii_case("NO")
                || word.eq_ignore_ascii_case("KEY"))
        {
            return true;
        }
        prev_for = word.eq_ignore_ascii_case("FOR");
    }
    false
}

/// Decide which cluster serves `sql`.
///
/// Explicit routes win. Otherwise read-only statements go to the replica
/// and everything else, including statements that cannot be classified,
/// goes to the master.
pub fn route_for(sql: &str, route: &Route) -> Cluster {
    match route {
        Route::Master => Cluster::Master,
        Route::Slave => Cluster::Slave,
        Route::Named(name) => Cluster::from(name.as_str()),
        Route::Auto => {
            if StatementKind::of(sql).is_read_only() {
                Cluster::Slave
            } else {
                Cluster::Master
            }
        }
    }
}
