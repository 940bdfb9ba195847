//! Counter metrics

use super::labels;
use metrics::counter;

/// Physical connect attempted against a host
pub fn connect_attempted(cluster: &str, host: &str) {
    counter!(
        "fraiseql_cluster_connect_attempts_total",
        labels::CLUSTER => cluster.to_string(),
        labels::HOST => host.to_string()
    )
    .increment(1);
}

/// Physical connect succeeded
pub fn connect_succeeded(cluster: &str, host: &str) {
    counter!(
        "fraiseql_cluster_connect_success_total",
        labels::CLUSTER => cluster.to_string(),
        labels::HOST => host.to_string()
    )
    .increment(1);
}

/// Physical connect failed
pub fn connect_failed(cluster: &str, category: &'static str) {
    counter!(
        "fraiseql_cluster_connect_failures_total",
        labels::CLUSTER => cluster.to_string(),
        labels::ERROR_CATEGORY => category
    )
    .increment(1);
}

/// Host excluded for the rest of a failover attempt
pub fn host_excluded(cluster: &str, host: &str) {
    counter!(
        "fraiseql_cluster_failover_total",
        labels::CLUSTER => cluster.to_string(),
        labels::HOST => host.to_string()
    )
    .increment(1);
}

/// Existing registry entry reused instead of opening a socket
pub fn connection_reused(cluster: &str) {
    counter!(
        "fraiseql_cluster_connection_reuse_total",
        labels::CLUSTER => cluster.to_string()
    )
    .increment(1);
}

/// Entry evicted after a failed health check
pub fn connection_evicted(host: &str) {
    counter!(
        "fraiseql_cluster_evictions_total",
        labels::HOST => host.to_string()
    )
    .increment(1);
}

/// Liveness probe sent
pub fn health_check_ping(cluster: &str, status: &'static str) {
    counter!(
        "fraiseql_cluster_health_checks_total",
        labels::CLUSTER => cluster.to_string(),
        labels::STATUS => status
    )
    .increment(1);
}

/// Reconnect issued by the health checker
pub fn health_check_reconnect(cluster: &str) {
    counter!(
        "fraiseql_cluster_reconnects_total",
        labels::CLUSTER => cluster.to_string()
    )
    .increment(1);
}

/// Statement failed
pub fn query_error(cluster: &str, category: &'static str) {
    counter!(
        "fraiseql_cluster_query_errors_total",
        labels::CLUSTER => cluster.to_string(),
        labels::ERROR_CATEGORY => category
    )
    .increment(1);
}

/// Transaction or savepoint opened
pub fn transaction_started(level: &'static str) {
    counter!("fraiseql_cluster_transactions_started_total", labels::LEVEL => level).increment(1);
}

/// Transaction or savepoint committed
pub fn transaction_committed(level: &'static str) {
    counter!("fraiseql_cluster_transactions_committed_total", labels::LEVEL => level).increment(1);
}

/// Transaction or savepoint rolled back
pub fn transaction_rolled_back(level: &'static str) {
    counter!("fraiseql_cluster_transactions_rolled_back_total", labels::LEVEL => level)
        .increment(1);
}

/// Authentication completed
pub fn auth_successful(mechanism: &'static str) {
    counter!("fraiseql_cluster_auth_success_total", labels::MECHANISM => mechanism).increment(1);
}

/// Server rejected authentication
pub fn auth_failed(mechanism: &'static str) {
    counter!("fraiseql_cluster_auth_failures_total", labels::MECHANISM => mechanism).increment(1);
}
