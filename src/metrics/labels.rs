//! Metric label keys and fixed label values

/// Cluster name (`master`, `slave`, or a named alternate)
pub const CLUSTER: &str = "cluster";
/// `host:port` of a physical connection
pub const HOST: &str = "host";
/// Error category, from [`crate::Error::category`]
pub const ERROR_CATEGORY: &str = "error_category";
/// Authentication mechanism
pub const MECHANISM: &str = "mechanism";
/// Transaction level (`root` or `savepoint`)
pub const LEVEL: &str = "level";
/// Outcome of an operation
pub const STATUS: &str = "status";

/// No password exchange
pub const MECHANISM_TRUST: &str = "trust";
/// Cleartext password
pub const MECHANISM_CLEARTEXT: &str = "cleartext";
/// SCRAM-SHA-256
pub const MECHANISM_SCRAM: &str = "scram-sha-256";

/// Outermost transaction
pub const LEVEL_ROOT: &str = "root";
/// Savepoint-backed nested transaction
pub const LEVEL_SAVEPOINT: &str = "savepoint";

/// Operation succeeded
pub const STATUS_OK: &str = "ok";
/// Operation failed
pub const STATUS_ERROR: &str = "error";
