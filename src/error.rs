//! Error types

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Why a connect attempt was aborted without trying other hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The configured database does not exist on the server
    UnknownDatabase,
    /// The server rejected the configured credentials
    AccessDenied,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDatabase => f.write_str("the database does not exist"),
            Self::AccessDenied => f.write_str("the database account or password is wrong"),
        }
    }
}

/// Structured ErrorResponse sent by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    /// Severity (ERROR, FATAL, PANIC)
    pub severity: Option<String>,
    /// SQLSTATE code
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Additional detail
    pub detail: Option<String>,
}

impl ServerError {
    /// Build a server error from a SQLSTATE code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Some("ERROR".into()),
            code: Some(code.into()),
            message: message.into(),
            detail: None,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying socket
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed or unexpected protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Client-side authentication failure (missing password, bad SCRAM exchange)
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Server closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Connection is busy with another operation
    #[error("connection busy: {0}")]
    ConnectionBusy(String),

    /// Illegal connection state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Physical connect did not finish within the configured timeout
    #[error("connect to {host} timed out")]
    ConnectTimeout {
        /// `host:port` that did not answer
        host: String,
    },

    /// ErrorResponse from the server
    #[error("server error: {0}")]
    Server(ServerError),

    /// Misconfiguration detected while connecting; never retried on another host
    #[error("{reason}")]
    ConfigurationFatal {
        /// What was rejected
        reason: FatalReason,
        /// Driver-native error code
        code: Option<String>,
    },

    /// Every candidate host of a cluster failed with a transient error
    #[error("no reachable host for cluster '{cluster}'{}", .last.as_ref().map(|e| format!(": {}", e)).unwrap_or_default())]
    PoolExhausted {
        /// Cluster that was being connected
        cluster: String,
        /// Last transient failure recorded during the attempt
        last: Option<Box<Error>>,
    },

    /// Liveness probe kept failing past the retry ceiling
    #[error("connection to cluster '{cluster}' lost after {failures} failed health checks")]
    ConnectionLost {
        /// Cluster whose connection died
        cluster: String,
        /// Consecutive failures observed
        failures: u32,
    },

    /// A statement failed on an otherwise healthy connection
    #[error("query failed: {message}{}", .sql.as_ref().map(|s| format!(". SQL: {}", s)).unwrap_or_default())]
    Query {
        /// Server message
        message: String,
        /// Driver-native error code (SQLSTATE)
        code: Option<String>,
        /// Statement text, only attached in debug mode
        sql: Option<String>,
    },

    /// Transaction operation invoked in an invalid state
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl Error {
    /// Driver-native error code, when one exists
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Server(err) => err.code.as_deref(),
            Error::ConfigurationFatal { code, .. } | Error::Query { code, .. } => code.as_deref(),
            Error::PoolExhausted { last: Some(last), .. } => last.code(),
            _ => None,
        }
    }

    /// Stable label for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Protocol(_) => "protocol",
            Error::Authentication(_) => "authentication",
            Error::ConnectionClosed => "connection_closed",
            Error::ConnectionBusy(_) => "connection_busy",
            Error::InvalidState { .. } => "invalid_state",
            Error::ConnectTimeout { .. } => "connect_timeout",
            Error::Server(_) => "server",
            Error::ConfigurationFatal { .. } => "configuration_fatal",
            Error::PoolExhausted { .. } => "pool_exhausted",
            Error::ConnectionLost { .. } => "connection_lost",
            Error::Query { .. } => "query",
            Error::Transaction(_) => "transaction",
        }
    }

    /// Convert a driver failure on a live connection into a query error.
    ///
    /// Server errors become [`Error::Query`]; the SQL text is only kept when
    /// `debug` is set. Transport-level failures pass through unchanged.
    pub fn into_query_error(self, sql: &str, debug: bool) -> Error {
        match self {
            Error::Server(err) => Error::Query {
                message: err.message,
                code: err.code,
                sql: debug.then(|| sql.to_string()),
            },
            other => other,
        }
    }

    /// Whether the error means the socket itself is unusable
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionClosed | Error::ConnectionLost { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_fatal_hides_server_text() {
        let err = Error::ConfigurationFatal {
            reason: FatalReason::UnknownDatabase,
            code: Some("3D000".into()),
        };
        assert_eq!(err.to_string(), "the database does not exist");
        assert_eq!(err.code(), Some("3D000"));
    }

    #[test]
    fn test_pool_exhausted_reports_last_error() {
        let err = Error::PoolExhausted {
            cluster: "slave".into(),
            last: Some(Box::new(Error::ConnectTimeout {
                host: "10.0.0.1:5432".into(),
            })),
        };
        assert_eq!(
            err.to_string(),
            "no reachable host for cluster 'slave': connect to 10.0.0.1:5432 timed out"
        );

        let bare = Error::PoolExhausted {
            cluster: "master".into(),
            last: None,
        };
        assert_eq!(bare.to_string(), "no reachable host for cluster 'master'");
    }

    #[test]
    fn test_query_error_omits_sql_outside_debug() {
        let server = Error::Server(ServerError::new("42601", "syntax error"));
        let err = server.into_query_error("SELEC 1", false);
        assert_eq!(err.to_string(), "query failed: syntax error");
        assert_eq!(err.code(), Some("42601"));

        let server = Error::Server(ServerError::new("42601", "syntax error"));
        let err = server.into_query_error("SELEC 1", true);
        assert_eq!(err.to_string(), "query failed: syntax error. SQL: SELEC 1");
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(Error::ConnectionClosed.category(), "connection_closed");
        assert_eq!(Error::Transaction("x".into()).category(), "transaction");
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::Config("x".into()).is_connection_error());
    }
}
