//! Database configuration

use crate::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default Postgres port
pub const DEFAULT_PORT: u16 = 5432;

/// Default bound on one physical connect
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default minimum time between two liveness probes of one connection
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// One host, or a list of hosts sharing the load
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HostList {
    /// Single host
    One(String),
    /// Several interchangeable hosts
    Many(Vec<String>),
}

impl HostList {
    fn as_slice(&self) -> &[String] {
        match self {
            HostList::One(host) => std::slice::from_ref(host),
            HostList::Many(hosts) => hosts,
        }
    }
}

/// `hostname` setting
///
/// ```json
/// "db1"
/// ["db1", "db2"]
/// {"master": "db1", "slave": ["db2", "db3:5433"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HostConfig {
    /// One host serving every cluster
    Single(String),
    /// Host list serving every cluster
    List(Vec<String>),
    /// Hosts per cluster name
    Clusters(BTreeMap<String, HostList>),
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig::Single("localhost".into())
    }
}

/// A candidate server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostAddr {
    /// Host name, IP address, or Unix socket directory
    pub host: String,
    /// Port
    pub port: u16,
}

impl HostAddr {
    /// Create an address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]:port` or a socket directory.
    ///
    /// `default_port` applies when the entry carries none.
    pub fn parse(entry: &str, default_port: u16) -> Result<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(Error::Config("empty host entry".into()));
        }
        if entry.starts_with('/') {
            return Ok(Self::new(entry, default_port));
        }

        if let Some(rest) = entry.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::Config(format!("unterminated IPv6 host: {}", entry)))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::Config(format!("invalid host entry: {}", entry))),
            };
            return Ok(Self::new(host, port));
        }

        match entry.split_once(':') {
            // a bare IPv6 address has more than one colon
            Some((host, port)) if !port.contains(':') => Ok(Self::new(host, parse_port(port)?)),
            _ => Ok(Self::new(entry, default_port)),
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| Error::Config(format!("invalid port: {}", s)))
}

/// Connection settings shared by every cluster of one database
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Servers, globally or per cluster
    pub hostname: HostConfig,
    /// Port for host entries that carry none
    pub port: u16,
    /// User name
    pub username: String,
    /// Password
    pub password: Option<String>,
    /// Database name
    pub database: String,
    /// Session character encoding set after connect
    pub charset: Option<String>,
    /// Request long-lived sockets; part of the pooling identity
    pub persistent: bool,
    /// Extra startup parameters
    pub options: BTreeMap<String, String>,
    /// Bound on one physical connect, in seconds
    #[serde(deserialize_with = "seconds")]
    pub connect_timeout: Duration,
    /// Minimum time between liveness probes, in seconds; 0 probes every time
    #[serde(deserialize_with = "seconds")]
    pub health_check_interval: Duration,
    /// Attach SQL text to query errors
    pub debug: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            hostname: HostConfig::default(),
            port: DEFAULT_PORT,
            username: whoami::username(),
            password: None,
            database: String::new(),
            charset: None,
            persistent: false,
            options: BTreeMap::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            debug: false,
        }
    }
}

fn seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "invalid duration in seconds: {}",
            secs
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

impl DatabaseConfig {
    /// Create a builder
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = DatabaseConfig::builder("shop", "app")
    ///     .password("secret")
    ///     .cluster_hosts("master", ["10.0.0.1"])
    ///     .cluster_hosts("slave", ["10.0.0.2", "10.0.0.3"])
    ///     .charset("UTF8")
    ///     .build()?;
    /// ```
    pub fn builder(
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder {
            config: DatabaseConfig {
                database: database.into(),
                username: username.into(),
                ..DatabaseConfig::default()
            },
            clusters: BTreeMap::new(),
        }
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::Config("database name is required".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Config("username is required".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect_timeout must be positive".into()));
        }
        match &self.hostname {
            HostConfig::Single(host) => {
                HostAddr::parse(host, self.port)?;
            }
            HostConfig::List(hosts) => self.validate_hosts("hostname", hosts)?,
            HostConfig::Clusters(clusters) => {
                if clusters.is_empty() {
                    return Err(Error::Config("hostname map names no cluster".into()));
                }
                for (name, hosts) in clusters {
                    self.validate_hosts(name, hosts.as_slice())?;
                }
            }
        }
        Ok(())
    }

    fn validate_hosts(&self, what: &str, hosts: &[String]) -> Result<()> {
        if hosts.is_empty() {
            return Err(Error::Config(format!("{}: host list is empty", what)));
        }
        for host in hosts {
            HostAddr::parse(host, self.port)?;
        }
        Ok(())
    }

    /// Candidate servers for `cluster`, in configured order.
    ///
    /// A host or host list serves every cluster. A per-cluster map must name
    /// the cluster, except that a missing `slave` falls back to `master`.
    pub fn hosts_for(&self, cluster: &str) -> Result<Vec<HostAddr>> {
        let hosts: &[String] = match &self.hostname {
            HostConfig::Single(host) => std::slice::from_ref(host),
            HostConfig::List(hosts) => hosts,
            HostConfig::Clusters(clusters) => match clusters.get(cluster) {
                Some(list) => list.as_slice(),
                None if cluster == "slave" => clusters
                    .get("master")
                    .map(HostList::as_slice)
                    .ok_or_else(|| unknown_cluster(cluster))?,
                None => return Err(unknown_cluster(cluster)),
            },
        };
        if hosts.is_empty() {
            return Err(Error::Config(format!(
                "no hosts configured for cluster '{}'",
                cluster
            )));
        }
        hosts
            .iter()
            .map(|h| HostAddr::parse(h, self.port))
            .collect()
    }
}

fn unknown_cluster(cluster: &str) -> Error {
    Error::Config(format!("no hosts configured for cluster '{}'", cluster))
}

/// Builder for [`DatabaseConfig`]
#[derive(Debug, Clone)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
    clusters: BTreeMap<String, HostList>,
}

impl DatabaseConfigBuilder {
    /// Single host for every cluster
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.hostname = HostConfig::Single(host.into());
        self
    }

    /// Host list for every cluster
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hostname = HostConfig::List(hosts.into_iter().map(Into::into).collect());
        self
    }

    /// Hosts for one named cluster; overrides `host`/`hosts`
    pub fn cluster_hosts<I, S>(mut self, cluster: impl Into<String>, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clusters.insert(
            cluster.into(),
            HostList::Many(hosts.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Port for host entries without one
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Session character encoding
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.config.charset = Some(charset.into());
        self
    }

    /// Request persistent connections
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.config.persistent = persistent;
        self
    }

    /// Add a startup parameter
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.options.insert(key.into(), value.into());
        self
    }

    /// Bound on one physical connect
    ///
    /// Default: 3 seconds
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Minimum time between liveness probes
    ///
    /// Default: 5 seconds. Zero probes before every use.
    pub fn health_check_interval(mut self, duration: Duration) -> Self {
        self.config.health_check_interval = duration;
        self
    }

    /// Attach SQL text to query errors
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> Result<DatabaseConfig> {
        if !self.clusters.is_empty() {
            self.config.hostname = HostConfig::Clusters(self.clusters);
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_addr_parse() {
        assert_eq!(
            HostAddr::parse("10.0.0.1", 5432).unwrap(),
            HostAddr::new("10.0.0.1", 5432)
        );
        assert_eq!(
            HostAddr::parse("db2:5433", 5432).unwrap(),
            HostAddr::new("db2", 5433)
        );
        assert_eq!(
            HostAddr::parse("[::1]:6000", 5432).unwrap(),
            HostAddr::new("::1", 6000)
        );
        assert_eq!(
            HostAddr::parse("::1", 5432).unwrap(),
            HostAddr::new("::1", 5432)
        );
        assert_eq!(
            HostAddr::parse("/var/run/postgresql", 5433).unwrap(),
            HostAddr::new("/var/run/postgresql", 5433)
        );
        assert!(HostAddr::parse("db:notaport", 5432).is_err());
        assert!(HostAddr::parse("", 5432).is_err());
    }

    #[test]
    fn test_host_addr_display() {
        assert_eq!(HostAddr::new("db", 5432).to_string(), "db:5432");
        assert_eq!(HostAddr::new("::1", 5432).to_string(), "[::1]:5432");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: DatabaseConfig = serde_json::from_str(
            r#"{"hostname": ["10.0.0.1", "10.0.0.2"], "username": "app", "database": "shop"}"#,
        )
        .unwrap();

        assert_eq!(config.port, 5432);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert!(!config.persistent);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.hosts_for("slave").unwrap(),
            vec![HostAddr::new("10.0.0.1", 5432), HostAddr::new("10.0.0.2", 5432)]
        );
    }

    #[test]
    fn test_deserialize_cluster_map() {
        let config: DatabaseConfig = serde_json::from_str(
            r#"{
                "hostname": {"master": "db1", "slave": ["db2", "db3:5433"]},
                "username": "app",
                "database": "shop",
                "connect_timeout": 1.5,
                "options": {"search_path": "app"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.options.get("search_path").map(String::as_str), Some("app"));
        assert_eq!(config.hosts_for("master").unwrap(), vec![HostAddr::new("db1", 5432)]);
        assert_eq!(
            config.hosts_for("slave").unwrap(),
            vec![HostAddr::new("db2", 5432), HostAddr::new("db3", 5433)]
        );
        assert!(matches!(config.hosts_for("reports"), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_slave_falls_back_to_master() {
        let config = DatabaseConfig::builder("shop", "app")
            .cluster_hosts("master", ["db1"])
            .build()
            .unwrap();
        assert_eq!(config.hosts_for("slave").unwrap(), vec![HostAddr::new("db1", 5432)]);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let err = DatabaseConfig::builder("", "app").build().unwrap_err();
        assert!(err.to_string().contains("database name"));

        let err = DatabaseConfig::builder("shop", "app")
            .hosts(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("host list is empty"));

        let err = DatabaseConfig::builder("shop", "app")
            .connect_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("connect_timeout"));
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = DatabaseConfig::builder("shop", "app")
            .host("db1:6432")
            .password("secret")
            .charset("UTF8")
            .persistent(true)
            .option("search_path", "app")
            .health_check_interval(Duration::ZERO)
            .debug(true)
            .build()
            .unwrap();

        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.charset.as_deref(), Some("UTF8"));
        assert!(config.persistent);
        assert!(config.debug);
        assert!(config.health_check_interval.is_zero());
        assert_eq!(config.hosts_for("master").unwrap(), vec![HostAddr::new("db1", 6432)]);
    }
}
