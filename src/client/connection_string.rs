//! Connection string parsing
//!
//! Supports formats:
//! * postgres://[user[:password]@]host[:port][,host[:port]...][/database][?params]
//! * postgres:///database?host=/path/to/socket (Unix socket directory)
//!
//! Recognised parameters: `charset`, `persistent`, `connect_timeout`,
//! `health_check_interval` (seconds), `debug`, `port`, `host` (replaces the
//! authority hosts), `master`/`slave` and `cluster.<name>` (comma-separated
//! hosts for one cluster). Anything else becomes a startup option.

use crate::config::{DatabaseConfig, HostConfig, HostList};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;

impl DatabaseConfig {
    /// Parse a connection string
    pub fn from_url(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("postgres://")
            .or_else(|| s.strip_prefix("postgresql://"))
            .ok_or_else(|| {
                Error::Config("connection string must start with postgres://".into())
            })?;

        let (rest, query_string) = rest.split_once('?').unwrap_or((rest, ""));

        let (auth, rest) = match rest.rfind('@') {
            Some(pos) => (Some(&rest[..pos]), &rest[pos + 1..]),
            None => (None, rest),
        };

        let mut config = DatabaseConfig::default();
        if let Some(auth) = auth {
            match auth.split_once(':') {
                Some((user, password)) => {
                    config.username = user.to_string();
                    config.password = Some(password.to_string());
                }
                None => config.username = auth.to_string(),
            }
        }

        let (hosts, database) = rest.split_once('/').unwrap_or((rest, ""));
        config.database = if database.is_empty() {
            config.username.clone()
        } else {
            database.to_string()
        };

        let mut hosts: Vec<String> = split_hosts(hosts);
        let mut clusters: BTreeMap<String, HostList> = BTreeMap::new();

        for (key, value) in query_pairs(query_string) {
            match key {
                "charset" => config.charset = Some(value.to_string()),
                "persistent" => config.persistent = parse_bool(key, value)?,
                "debug" => config.debug = parse_bool(key, value)?,
                "connect_timeout" => config.connect_timeout = parse_seconds(key, value)?,
                "health_check_interval" => {
                    config.health_check_interval = parse_seconds(key, value)?
                }
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {}", value)))?
                }
                "host" => hosts = split_hosts(value),
                "master" | "slave" => {
                    clusters.insert(key.to_string(), HostList::Many(split_hosts(value)));
                }
                _ => match key.strip_prefix("cluster.") {
                    Some(name) if !name.is_empty() => {
                        clusters.insert(name.to_string(), HostList::Many(split_hosts(value)));
                    }
                    _ => {
                        config.options.insert(key.to_string(), value.to_string());
                    }
                },
            }
        }

        if hosts.is_empty() && clusters.is_empty() {
            return Err(Error::Config(
                "connection string names no host. Set the host query parameter for Unix sockets"
                    .into(),
            ));
        }

        config.hostname = if clusters.is_empty() {
            match hosts.len() {
                1 => HostConfig::Single(hosts.remove(0)),
                _ => HostConfig::List(hosts),
            }
        } else {
            if !hosts.is_empty() {
                clusters
                    .entry("master".to_string())
                    .or_insert(HostList::Many(hosts));
            }
            HostConfig::Clusters(clusters)
        };

        config.validate()?;
        Ok(config)
    }
}

fn split_hosts(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

fn query_pairs(query_string: &str) -> impl Iterator<Item = (&str, &str)> {
    query_string
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("invalid {}: {}", key, other))),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| Error::Config(format!("invalid {}: {}", key, value)))
}
