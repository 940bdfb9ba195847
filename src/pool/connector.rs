//! Host failover connect

use super::classify::{classify, ErrorClass};
use super::key::ConnectionKey;
use super::registry::{ConnectionEntry, ConnectionRegistry};
use super::selector::HostSelector;
use crate::config::{DatabaseConfig, HostAddr};
use crate::driver::{ConnectTarget, Driver};
use crate::router::Cluster;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;

/// Opens or reuses a connection for a cluster, failing over across its hosts
pub struct Connector<'a> {
    registry: &'a ConnectionRegistry,
    driver: &'a dyn Driver,
    selector: &'a dyn HostSelector,
}

impl<'a> Connector<'a> {
    /// Connector over the given registry, driver and selection strategy
    pub fn new(
        registry: &'a ConnectionRegistry,
        driver: &'a dyn Driver,
        selector: &'a dyn HostSelector,
    ) -> Self {
        Self {
            registry,
            driver,
            selector,
        }
    }

    /// Return a referenced entry for `cluster`.
    ///
    /// An entry already registered for any candidate host is reused, checked
    /// in configured order. Otherwise candidates are tried until one connects:
    /// a fatal failure aborts at once, a retryable one excludes the host for
    /// the rest of this call.
    pub async fn connect(
        &self,
        config: &DatabaseConfig,
        cluster: &Cluster,
    ) -> Result<Arc<ConnectionEntry>> {
        let hosts = config.hosts_for(cluster.as_str())?;

        for host in &hosts {
            let key = ConnectionKey::new(host, config.username.as_str(), config.persistent);
            if let Some(entry) = self.registry.try_acquire(&key) {
                tracing::debug!(cluster = %cluster, connection = %entry.identity(), "reusing connection");
                crate::metrics::counters::connection_reused(cluster.as_str());
                if let Err(e) = prepare_session(&entry, config).await {
                    self.registry.release_entry(&entry).await;
                    return Err(e);
                }
                return Ok(entry);
            }
        }

        let mut excluded: HashSet<HostAddr> = HashSet::new();
        let mut last: Option<Error> = None;

        loop {
            let Some(host) = self.selector.select(&hosts, &excluded).cloned() else {
                tracing::warn!(cluster = %cluster, tried = excluded.len(), "no reachable host");
                return Err(Error::PoolExhausted {
                    cluster: cluster.to_string(),
                    last: last.map(Box::new),
                });
            };

            let span = tracing::info_span!("connect", cluster = %cluster, host = %host);
            match self.open(config, cluster, &host).instrument(span).await {
                Ok(entry) => return Ok(entry),
                Err(err) => {
                    crate::metrics::counters::connect_failed(cluster.as_str(), err.category());
                    match classify(&err) {
                        ErrorClass::Fatal(reason) => {
                            tracing::error!(cluster = %cluster, host = %host, "fatal connect error: {}", err);
                            return Err(Error::ConfigurationFatal {
                                reason,
                                code: err.code().map(str::to_string),
                            });
                        }
                        ErrorClass::Retryable => {
                            tracing::warn!(cluster = %cluster, host = %host, "connect failed, trying next host: {}", err);
                            crate::metrics::counters::host_excluded(
                                cluster.as_str(),
                                &host.to_string(),
                            );
                            excluded.insert(host);
                            last = Some(err);
                        }
                    }
                }
            }
        }
    }

    async fn open(
        &self,
        config: &DatabaseConfig,
        cluster: &Cluster,
        host: &HostAddr,
    ) -> Result<Arc<ConnectionEntry>> {
        let key = ConnectionKey::new(host, config.username.as_str(), config.persistent);
        let target = ConnectTarget {
            host: host.host.clone(),
            port: host.port,
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            options: config.options.clone(),
            persistent: config.persistent,
        };

        let entry = self
            .registry
            .acquire(&key, || async {
                let started = Instant::now();
                crate::metrics::counters::connect_attempted(cluster.as_str(), &host.to_string());

                let conn = tokio::time::timeout(config.connect_timeout, self.driver.connect(&target))
                    .await
                    .map_err(|_| Error::ConnectTimeout {
                        host: host.to_string(),
                    })??;

                let entry = ConnectionEntry::new(key.clone(), conn, config.database.as_str());
                if let Some(ref charset) = config.charset {
                    if let Err(e) = entry.set_charset(charset).await {
                        entry.close().await;
                        return Err(e);
                    }
                }

                crate::metrics::histograms::connect_duration(cluster.as_str(), started.elapsed());
                crate::metrics::counters::connect_succeeded(cluster.as_str(), &host.to_string());
                tracing::info!(connection = %target.identity(), "connected");
                Ok::<_, Error>(entry)
            })
            .await?;

        // A concurrent caller may have registered the key first
        if let Err(e) = prepare_session(&entry, config).await {
            self.registry.release_entry(&entry).await;
            return Err(e);
        }
        Ok(entry)
    }
}

/// Align a shared connection with this configuration's database and charset
async fn prepare_session(entry: &ConnectionEntry, config: &DatabaseConfig) -> Result<()> {
    entry.select_database(&config.database).await?;
    if let Some(ref charset) = config.charset {
        entry.set_charset(charset).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FatalReason;
    use crate::pool::selector::OrderedSelector;
    use crate::testing::ScriptedDriver;
    use std::time::Duration;

    fn config(hosts: &[&str]) -> DatabaseConfig {
        DatabaseConfig::builder("shop", "app")
            .hosts(hosts.iter().copied())
            .charset("UTF8")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_failover_to_second_host() {
        let driver = ScriptedDriver::new();
        driver.refuse("a");
        let registry = ConnectionRegistry::new();
        let connector = Connector::new(&registry, &driver, &OrderedSelector);

        let entry = connector
            .connect(&config(&["a", "b"]), &Cluster::Master)
            .await
            .unwrap();

        assert_eq!(entry.key().host, "b");
        assert_eq!(driver.attempts(), vec!["a", "b"]);
        assert_eq!(driver.executed("b"), vec!["SET NAMES UTF8".to_string()]);
        assert_eq!(entry.charset().as_deref(), Some("UTF8"));
    }

    #[tokio::test]
    async fn test_fatal_error_stops_failover() {
        let driver = ScriptedDriver::new();
        driver.reject("a", "3D000");
        let registry = ConnectionRegistry::new();
        let connector = Connector::new(&registry, &driver, &OrderedSelector);

        let err = connector
            .connect(&config(&["a", "b"]), &Cluster::Master)
            .await
            .unwrap_err();

        match err {
            Error::ConfigurationFatal { reason, code } => {
                assert_eq!(reason, FatalReason::UnknownDatabase);
                assert_eq!(code.as_deref(), Some("3D000"));
            }
            other => panic!("expected ConfigurationFatal, got {:?}", other),
        }
        assert_eq!(driver.attempts(), vec!["a"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_reports_last_error() {
        let driver = ScriptedDriver::new();
        driver.refuse("a");
        driver.refuse("b");
        let registry = ConnectionRegistry::new();
        let connector = Connector::new(&registry, &driver, &OrderedSelector);

        let err = connector
            .connect(&config(&["a", "b"]), &Cluster::Slave)
            .await
            .unwrap_err();

        match err {
            Error::PoolExhausted { cluster, last } => {
                assert_eq!(cluster, "slave");
                assert!(last.unwrap().to_string().contains("connection refused: b"));
            }
            other => panic!("expected PoolExhausted, got {:?}", other),
        }
        // each host tried once
        assert_eq!(driver.attempts(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_retryable() {
        let driver = ScriptedDriver::new();
        driver.hang("a");
        let registry = ConnectionRegistry::new();
        let connector = Connector::new(&registry, &driver, &OrderedSelector);
        let mut config = config(&["a", "b"]);
        config.connect_timeout = Duration::from_secs(3);

        let started = Instant::now();
        let entry = connector.connect(&config, &Cluster::Master).await.unwrap();

        assert_eq!(entry.key().host, "b");
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_reuses_registered_candidate_in_list_order() {
        let driver = ScriptedDriver::new();
        let registry = ConnectionRegistry::new();
        let connector = Connector::new(&registry, &driver, &OrderedSelector);

        let first = connector
            .connect(&config(&["b"]), &Cluster::Master)
            .await
            .unwrap();
        let reused = connector
            .connect(&config(&["a", "b"]), &Cluster::Slave)
            .await
            .unwrap();

        assert_eq!(first.id(), reused.id());
        assert_eq!(reused.ref_count(), 2);
        assert_eq!(driver.connects(), 1);
        // charset already selected on the shared connection
        assert_eq!(driver.executed("b").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_cluster_is_config_error() {
        let driver = ScriptedDriver::new();
        let registry = ConnectionRegistry::new();
        let connector = Connector::new(&registry, &driver, &OrderedSelector);
        let config = DatabaseConfig::builder("shop", "app")
            .cluster_hosts("master", ["a"])
            .build()
            .unwrap();

        let err = connector
            .connect(&config, &Cluster::Named("reports".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(driver.attempts().is_empty());
    }
}
