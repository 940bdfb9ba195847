//! Lazy liveness checks with bounded reconnect

use super::registry::ConnectionEntry;
use super::Pool;
use crate::config::{DatabaseConfig, HostAddr};
use crate::router::Cluster;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Consecutive failed probes after which reconnecting stops
pub const MAX_FAILURES: u32 = 5;

/// Pause between closing a dead connection and reconnecting
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(3);

/// Outcome of [`HealthChecker::ensure_alive`]
#[derive(Debug)]
pub enum Health {
    /// Probe skipped or succeeded; keep using the entry
    Alive,
    /// The entry was dead, or already replaced by another session; use this
    /// one instead
    Reconnected(Arc<ConnectionEntry>),
}

/// Scope of a failure counter: one cluster of one configuration
///
/// Two configurations only share a counter when they name the same user,
/// persistence mode and candidate hosts for the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HealthKey {
    cluster: Cluster,
    username: String,
    persistent: bool,
    hosts: Vec<HostAddr>,
}

impl HealthKey {
    /// Counter scope of `cluster` under `config`
    pub fn new(config: &DatabaseConfig, cluster: &Cluster) -> Result<Self> {
        Ok(Self {
            cluster: cluster.clone(),
            username: config.username.clone(),
            persistent: config.persistent,
            hosts: config.hosts_for(cluster.as_str())?,
        })
    }

    /// Cluster this counter belongs to
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }
}

/// Tracks consecutive probe failures per [`HealthKey`]
#[derive(Debug)]
pub struct HealthChecker {
    failures: Mutex<HashMap<HealthKey, u32>>,
    max_failures: u32,
    backoff: Duration,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(MAX_FAILURES, RECONNECT_BACKOFF)
    }
}

impl HealthChecker {
    /// Checker with a custom retry ceiling and backoff
    pub fn new(max_failures: u32, backoff: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            max_failures,
            backoff,
        }
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &HealthKey) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    /// Forget the failures of `key`
    pub fn reset(&self, key: &HealthKey) {
        self.failures.lock().remove(key);
    }

    fn record_failure(&self, key: &HealthKey) -> u32 {
        let mut counters = self.failures.lock();
        let count = counters.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Verify `entry` is alive.
    ///
    /// An entry that is no longer the registered connection for its key was
    /// replaced by another session; the current one is returned without
    /// probing or counting a failure. Otherwise nothing is sent when less
    /// than `interval` has passed since the last successful check, and a
    /// zero interval always probes. A failed probe evicts the entry,
    /// discards its transactions, waits the backoff and reconnects. Once
    /// the cluster has failed `max_failures` times in a row the probe fails
    /// with [`Error::ConnectionLost`] instead.
    pub(crate) async fn ensure_alive(
        &self,
        pool: &Pool,
        config: &DatabaseConfig,
        cluster: &Cluster,
        entry: &Arc<ConnectionEntry>,
        interval: Duration,
    ) -> Result<Health> {
        let key = HealthKey::new(config, cluster)?;
        if !pool.registry().is_current(entry) {
            return self.follow(pool, config, &key, entry).await;
        }
        if !interval.is_zero() && entry.last_checked().elapsed() < interval {
            return Ok(Health::Alive);
        }

        match entry.ping().await {
            Ok(()) => {
                crate::metrics::counters::health_check_ping(
                    cluster.as_str(),
                    crate::metrics::labels::STATUS_OK,
                );
                entry.mark_checked();
                self.reset(&key);
                Ok(Health::Alive)
            }
            Err(err) => {
                crate::metrics::counters::health_check_ping(
                    cluster.as_str(),
                    crate::metrics::labels::STATUS_ERROR,
                );
                if !pool.registry().evict(entry).await {
                    // replaced while the probe was in flight
                    return self.follow(pool, config, &key, entry).await;
                }
                pool.transactions().discard(entry.key());

                let failures = self.record_failure(&key);
                if failures >= self.max_failures {
                    tracing::error!(cluster = %cluster, failures, "giving up on connection: {}", err);
                    return Err(Error::ConnectionLost {
                        cluster: cluster.to_string(),
                        failures,
                    });
                }

                tracing::warn!(
                    cluster = %cluster,
                    connection = %entry.identity(),
                    failures,
                    "health check failed, reconnecting: {}",
                    err
                );
                tokio::time::sleep(self.backoff).await;
                crate::metrics::counters::health_check_reconnect(cluster.as_str());
                let fresh = pool.connector().connect(config, cluster).await?;
                Ok(Health::Reconnected(fresh))
            }
        }
    }

    /// Move a session off an entry another session already evicted
    async fn follow(
        &self,
        pool: &Pool,
        config: &DatabaseConfig,
        key: &HealthKey,
        stale: &ConnectionEntry,
    ) -> Result<Health> {
        let failures = self.failures(key);
        if failures >= self.max_failures {
            return Err(Error::ConnectionLost {
                cluster: key.cluster.to_string(),
                failures,
            });
        }
        tracing::debug!(
            cluster = %key.cluster,
            connection = %stale.identity(),
            "connection was replaced by another session"
        );
        let current = pool.connector().connect(config, &key.cluster).await?;
        Ok(Health::Reconnected(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::OrderedSelector;
    use crate::testing::ScriptedDriver;

    struct Fixture {
        driver: ScriptedDriver,
        pool: Pool,
        config: DatabaseConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let driver = ScriptedDriver::new();
            Self {
                pool: Pool::builder()
                    .driver(driver.clone())
                    .selector(OrderedSelector)
                    .build(),
                driver,
                config: DatabaseConfig::builder("shop", "app")
                    .host("db1")
                    .build()
                    .unwrap(),
            }
        }

        async fn connect(&self) -> Arc<ConnectionEntry> {
            self.pool.connect(&self.config, &Cluster::Master).await.unwrap()
        }

        async fn check(&self, entry: &Arc<ConnectionEntry>, interval: Duration) -> Result<Health> {
            self.pool
                .ensure_alive(&self.config, &Cluster::Master, entry, interval)
                .await
        }

        fn key(&self) -> HealthKey {
            HealthKey::new(&self.config, &Cluster::Master).unwrap()
        }

        fn failures(&self) -> u32 {
            self.pool.health().failures(&self.key())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_skipped_within_interval() {
        let fx = Fixture::new();
        let entry = fx.connect().await;

        tokio::time::advance(Duration::from_secs(6)).await;
        fx.check(&entry, Duration::from_secs(5)).await.unwrap();
        assert_eq!(fx.driver.pings("db1"), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        fx.check(&entry, Duration::from_secs(5)).await.unwrap();
        assert_eq!(fx.driver.pings("db1"), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_always_pings() {
        let fx = Fixture::new();
        let entry = fx.connect().await;

        fx.check(&entry, Duration::ZERO).await.unwrap();
        fx.check(&entry, Duration::ZERO).await.unwrap();
        assert_eq!(fx.driver.pings("db1"), 2);
    }

    #[tokio::test]
    async fn test_failed_ping_reconnects() {
        let fx = Fixture::new();
        let entry = fx.connect().await;
        fx.driver.fail_pings("db1", true);

        let fresh = match fx.check(&entry, Duration::ZERO).await.unwrap() {
            Health::Reconnected(fresh) => fresh,
            Health::Alive => panic!("expected reconnect"),
        };

        assert_ne!(fresh.id(), entry.id());
        assert_eq!(fx.driver.connects(), 2);
        assert_eq!(fx.driver.closes(), 1);
        assert_eq!(fx.pool.registry().lookup(entry.key()).unwrap().id(), fresh.id());
        assert_eq!(fx.failures(), 1);

        fx.driver.fail_pings("db1", false);
        assert!(matches!(
            fx.check(&fresh, Duration::ZERO).await.unwrap(),
            Health::Alive
        ));
        assert_eq!(fx.failures(), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_failures() {
        let fx = Fixture::new();
        let mut entry = fx.connect().await;
        fx.driver.fail_pings("db1", true);

        for _ in 0..MAX_FAILURES - 1 {
            match fx.check(&entry, Duration::ZERO).await.unwrap() {
                Health::Reconnected(fresh) => entry = fresh,
                Health::Alive => panic!("expected reconnect"),
            }
        }
        let connects = fx.driver.connects();

        let err = fx.check(&entry, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { failures: 5, .. }));
        assert_eq!(fx.driver.connects(), connects);
        assert!(fx.pool.registry().is_empty());

        // stays lost until reset, without counting or reconnecting
        let err = fx.check(&entry, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { failures: 5, .. }));
        assert_eq!(fx.driver.connects(), connects);
        fx.pool.health().reset(&fx.key());
        assert_eq!(fx.failures(), 0);

        let fresh = match fx.check(&entry, Duration::ZERO).await.unwrap() {
            Health::Reconnected(fresh) => fresh,
            Health::Alive => panic!("expected reconnect"),
        };
        assert_eq!(fx.driver.connects(), connects + 1);
        assert_eq!(fx.failures(), 0);
        assert!(fx.pool.registry().is_current(&fresh));
    }

    #[tokio::test]
    async fn test_failure_discards_transaction_stack() {
        let fx = Fixture::new();
        let entry = fx.connect().await;
        let mut tx = fx.pool.transactions().transaction();
        tx.start(&entry).await.unwrap();
        assert!(fx.pool.transactions().is_active(entry.key()));

        fx.driver.fail_pings("db1", true);
        fx.check(&entry, Duration::ZERO).await.unwrap();

        assert!(!fx.pool.transactions().is_active(entry.key()));
        assert!(!tx.commit().await.unwrap());
    }

    #[tokio::test]
    async fn test_replaced_entry_is_followed_without_probing() {
        let fx = Fixture::new();
        let first = fx.connect().await;
        let second = fx.connect().await;
        assert_eq!(first.id(), second.id());
        fx.driver.fail_pings("db1", true);

        let fresh = match fx.check(&first, Duration::ZERO).await.unwrap() {
            Health::Reconnected(fresh) => fresh,
            Health::Alive => panic!("expected reconnect"),
        };
        let pings = fx.driver.pings("db1");

        let current = match fx.check(&second, Duration::ZERO).await.unwrap() {
            Health::Reconnected(current) => current,
            Health::Alive => panic!("stale entry reported alive"),
        };
        assert_eq!(current.id(), fresh.id());
        assert_eq!(fresh.ref_count(), 2);
        assert_eq!(fx.driver.pings("db1"), pings);
        assert_eq!(fx.driver.connects(), 2);
        assert_eq!(fx.failures(), 1);
    }

    #[tokio::test]
    async fn test_replaced_entry_keeps_transactions_of_replacement() {
        let fx = Fixture::new();
        let first = fx.connect().await;
        let second = fx.connect().await;
        fx.driver.fail_pings("db1", true);

        let fresh = match fx.check(&first, Duration::ZERO).await.unwrap() {
            Health::Reconnected(fresh) => fresh,
            Health::Alive => panic!("expected reconnect"),
        };
        fx.driver.fail_pings("db1", false);
        let mut tx = fx.pool.transactions().transaction();
        tx.start(&fresh).await.unwrap();

        fx.check(&second, Duration::ZERO).await.unwrap();
        assert!(tx.is_active());
        assert!(tx.commit().await.unwrap());
        assert_eq!(
            fx.driver.executed("db1").last().map(String::as_str),
            Some("COMMIT")
        );
    }

    #[tokio::test]
    async fn test_failures_are_counted_per_configuration() {
        let fx = Fixture::new();
        let dead = DatabaseConfig::builder("shop", "app").host("dead").build().unwrap();
        let alive = DatabaseConfig::builder("shop", "app").host("alive").build().unwrap();
        fx.driver.fail_pings("dead", true);

        let mut entry = fx.pool.connect(&dead, &Cluster::Master).await.unwrap();
        for _ in 0..MAX_FAILURES - 1 {
            match fx
                .pool
                .ensure_alive(&dead, &Cluster::Master, &entry, Duration::ZERO)
                .await
                .unwrap()
            {
                Health::Reconnected(fresh) => entry = fresh,
                Health::Alive => panic!("expected reconnect"),
            }
        }

        let other = fx.pool.connect(&alive, &Cluster::Master).await.unwrap();
        fx.driver.fail_pings("alive", true);
        let health = fx
            .pool
            .ensure_alive(&alive, &Cluster::Master, &other, Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(health, Health::Reconnected(_)));

        let failures = |config: &DatabaseConfig| {
            fx.pool
                .health()
                .failures(&HealthKey::new(config, &Cluster::Master).unwrap())
        };
        assert_eq!(failures(&dead), MAX_FAILURES - 1);
        assert_eq!(failures(&alive), 1);
    }
}
