//! Connection pool with host failover
//!
//! This module handles:
//! * The reference-counted connection registry
//! * Host selection and fatal/retryable error classification
//! * Failover connect across a cluster's hosts
//! * Lazy health checks with bounded reconnect
//!
//! A [`Pool`] is constructed once per process and shared (behind an `Arc`)
//! by every [`crate::Database`] session; [`Pool::shutdown`] closes it.

mod classify;
mod connector;
mod health;
mod key;
mod registry;
mod selector;

pub use classify::{classify, ErrorClass};
pub use connector::Connector;
pub use health::{Health, HealthChecker, HealthKey, MAX_FAILURES, RECONNECT_BACKOFF};
pub use key::ConnectionKey;
pub use registry::{ConnectionEntry, ConnectionRegistry};
pub use selector::{HostSelector, OrderedSelector, RandomSelector};

use crate::config::DatabaseConfig;
use crate::connection::PgDriver;
use crate::driver::Driver;
use crate::observer::QueryObserver;
use crate::router::Cluster;
use crate::transaction::TransactionManager;
use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shared connection state: registry, transaction stacks and health counters
pub struct Pool {
    registry: ConnectionRegistry,
    transactions: TransactionManager,
    health: HealthChecker,
    driver: Arc<dyn Driver>,
    selector: Arc<dyn HostSelector>,
    observer: Option<Arc<dyn QueryObserver>>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("connections", &self.registry.len())
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// Postgres pool with random host selection
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// Live connections
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Open transactions
    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Health-check failure counters
    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Query observer, if one was installed
    pub fn observer(&self) -> Option<&Arc<dyn QueryObserver>> {
        self.observer.as_ref()
    }

    /// Failover connector over this pool
    pub fn connector(&self) -> Connector<'_> {
        Connector::new(&self.registry, self.driver.as_ref(), self.selector.as_ref())
    }

    /// Referenced connection for `cluster`; see [`Connector::connect`]
    pub async fn connect(
        &self,
        config: &DatabaseConfig,
        cluster: &Cluster,
    ) -> Result<Arc<ConnectionEntry>> {
        self.connector().connect(config, cluster).await
    }

    /// Probe `entry` unless it was checked within `interval`; see
    /// [`HealthChecker`]
    pub async fn ensure_alive(
        &self,
        config: &DatabaseConfig,
        cluster: &Cluster,
        entry: &Arc<ConnectionEntry>,
        interval: Duration,
    ) -> Result<Health> {
        self.health
            .ensure_alive(self, config, cluster, entry, interval)
            .await
    }

    /// Drop one reference to `entry`
    pub async fn release(&self, entry: &ConnectionEntry) {
        self.registry.release_entry(entry).await;
    }

    /// Close every connection and forget every transaction
    pub async fn shutdown(&self) {
        tracing::info!(connections = self.registry.len(), "shutting down pool");
        self.transactions.clear();
        self.registry.shutdown().await;
    }
}

/// Builder for [`Pool`]
#[derive(Default)]
pub struct PoolBuilder {
    driver: Option<Arc<dyn Driver>>,
    selector: Option<Arc<dyn HostSelector>>,
    observer: Option<Arc<dyn QueryObserver>>,
    health: Option<HealthChecker>,
}

impl PoolBuilder {
    /// Driver used to open physical connections
    ///
    /// Default: [`PgDriver`]
    pub fn driver(mut self, driver: impl Driver) -> Self {
        self.driver = Some(Arc::new(driver));
        self
    }

    /// Host selection strategy
    ///
    /// Default: [`RandomSelector`]
    pub fn selector(mut self, selector: impl HostSelector) -> Self {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Receive an event for every executed statement
    pub fn observer(mut self, observer: impl QueryObserver) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Retry ceiling and reconnect backoff of health checks
    ///
    /// Default: 5 failures, 3 ms
    pub fn health_check(mut self, max_failures: u32, backoff: Duration) -> Self {
        self.health = Some(HealthChecker::new(max_failures, backoff));
        self
    }

    /// Build the pool
    pub fn build(self) -> Pool {
        Pool {
            registry: ConnectionRegistry::new(),
            transactions: TransactionManager::new(),
            health: self.health.unwrap_or_default(),
            driver: self.driver.unwrap_or_else(|| Arc::new(PgDriver::new())),
            selector: self.selector.unwrap_or_else(|| Arc::new(RandomSelector)),
            observer: self.observer,
        }
    }
}
