//! Gauge metrics

use metrics::gauge;

/// Physical connections currently held by a registry
pub fn registry_size(size: usize) {
    gauge!("fraiseql_cluster_registry_connections").set(size as f64);
}
