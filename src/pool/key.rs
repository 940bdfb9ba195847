//! Physical connection identity

use crate::config::HostAddr;
use std::fmt;

/// Identifies one physical connection independently of the logical slots
/// that reference it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    /// Host name, IP address, or Unix socket directory
    pub host: String,
    /// Port
    pub port: u16,
    /// User name
    pub username: String,
    /// Persistent socket requested
    pub persistent: bool,
}

impl ConnectionKey {
    /// Key for `username` on `addr`
    pub fn new(addr: &HostAddr, username: impl Into<String>, persistent: bool) -> Self {
        Self {
            host: addr.host.clone(),
            port: addr.port,
            username: username.into(),
            persistent,
        }
    }

    /// Server address of this key
    pub fn addr(&self) -> HostAddr {
        HostAddr::new(self.host.clone(), self.port)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.addr())?;
        if self.persistent {
            f.write_str(" (persistent)")?;
        }
        Ok(())
    }
}
