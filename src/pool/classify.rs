//! Fatal vs retryable connect failures

use crate::error::FatalReason;
use crate::protocol::constants::sqlstate;
use crate::Error;

/// How the failover loop treats a connect failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Misconfiguration; every host would fail the same way
    Fatal(FatalReason),
    /// The host may be down; try another one
    Retryable,
}

/// Classify a connect-time failure.
///
/// An unknown database (SQLSTATE `3D000`) or rejected credentials (class `28`,
/// or a client-side authentication failure) is fatal. Everything else is
/// retryable.
pub fn classify(err: &Error) -> ErrorClass {
    match err {
        Error::ConfigurationFatal { reason, .. } => ErrorClass::Fatal(*reason),
        Error::Authentication(_) => ErrorClass::Fatal(FatalReason::AccessDenied),
        Error::Server(_) | Error::Query { .. } => match err.code() {
            Some(sqlstate::INVALID_CATALOG_NAME) => ErrorClass::Fatal(FatalReason::UnknownDatabase),
            Some(code) if code.starts_with(sqlstate::INVALID_AUTHORIZATION_CLASS) => {
                ErrorClass::Fatal(FatalReason::AccessDenied)
            }
            _ => ErrorClass::Retryable,
        },
        _ => ErrorClass::Retryable,
    }
}
