//! [`Driver`] implementation for Postgres

use super::conn::Connection;
use super::transport::Transport;
use crate::driver::{ConnectTarget, Dialect, Driver, DriverConnection, Execution};
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Opens [`Connection`]s over TCP or Unix sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

impl PgDriver {
    /// Create the driver
    pub fn new() -> Self {
        Self
    }
}

impl Driver for PgDriver {
    fn connect<'a>(
        &'a self,
        target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn DriverConnection>>> {
        async move {
            // Postgres has no client-side persistent sockets; the flag only
            // affects pooling identity.
            let transport = Transport::connect(&target.host, target.port).await?;
            let mut conn = Connection::new(transport);
            conn.startup(target).await?;
            Ok(Box::new(conn) as Box<dyn DriverConnection>)
        }
        .boxed()
    }
}

impl DriverConnection for Connection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Execution>> {
        self.simple_query(sql).boxed()
    }

    fn ping(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.simple_query("SELECT 1").await?;
            Ok(())
        }
        .boxed()
    }

    fn set_charset<'a>(&'a mut self, charset: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            if !charset
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(Error::Config(format!("invalid charset name: {}", charset)));
            }
            self.simple_query(&format!("SET client_encoding TO '{}'", charset))
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn select_database<'a>(&'a mut self, database: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            if database == self.database() {
                Ok(())
            } else {
                Err(Error::Config(format!(
                    "postgres cannot switch from database '{}' to '{}' within a session",
                    self.database(),
                    database
                )))
            }
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Connection::close(self).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        let target = ConnectTarget {
            host: "127.0.0.1".into(),
            port: 1,
            username: "postgres".into(),
            password: None,
            database: "postgres".into(),
            options: BTreeMap::new(),
            persistent: false,
        };
        let err = PgDriver::new().connect(&target).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
