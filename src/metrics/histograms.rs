//! Histogram metrics

use super::labels;
use metrics::histogram;
use std::time::Duration;

/// Time to open and prepare one physical connection
pub fn connect_duration(cluster: &str, elapsed: Duration) {
    histogram!(
        "fraiseql_cluster_connect_duration_seconds",
        labels::CLUSTER => cluster.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Time to execute one statement
pub fn query_duration(cluster: &str, elapsed: Duration) {
    histogram!(
        "fraiseql_cluster_query_duration_seconds",
        labels::CLUSTER => cluster.to_string()
    )
    .record(elapsed.as_secs_f64());
}
