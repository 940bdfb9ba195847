//! In-memory driver for exercising the pool without a server
//!
//! [`ScriptedDriver`] records every connect, statement and ping per host and
//! can be told to refuse connections, reject them with a SQLSTATE, hang, or
//! fail pings and statements.

use crate::driver::{ConnectTarget, Dialect, Driver, DriverConnection, Execution, ResultSet};
use crate::error::ServerError;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Script {
    refused: HashSet<String>,
    rejected: HashMap<String, String>,
    hanging: HashSet<String>,
    failing_pings: HashSet<String>,
    failing_statements: Vec<(String, String)>,
    responses: Vec<(String, Execution)>,
    attempts: Vec<String>,
    executed: HashMap<String, Vec<String>>,
    targets: Vec<ConnectTarget>,
    pings: HashMap<String, usize>,
    connects: usize,
    closes: usize,
}

/// Scripted [`Driver`]; clones share one script
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    dialect: Dialect,
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDriver {
    /// Driver whose connections speak Postgres
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Postgres)
    }

    /// Driver whose connections report `dialect`
    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Connections to `host` fail with "connection refused"
    pub fn refuse(&self, host: &str) {
        self.script.lock().refused.insert(host.to_string());
    }

    /// Connections to `host` fail with a server error carrying `code`
    pub fn reject(&self, host: &str, code: &str) {
        self.script
            .lock()
            .rejected
            .insert(host.to_string(), code.to_string());
    }

    /// Connections to `host` never complete
    pub fn hang(&self, host: &str) {
        self.script.lock().hanging.insert(host.to_string());
    }

    /// Undo `refuse`, `reject` and `hang` for `host`
    pub fn heal(&self, host: &str) {
        let mut script = self.script.lock();
        script.refused.remove(host);
        script.rejected.remove(host);
        script.hanging.remove(host);
    }

    /// Make pings on connections to `host` fail or succeed
    pub fn fail_pings(&self, host: &str, fail: bool) {
        let mut script = self.script.lock();
        if fail {
            script.failing_pings.insert(host.to_string());
        } else {
            script.failing_pings.remove(host);
        }
    }

    /// Statements starting with `prefix` fail with `code`
    pub fn fail_statement(&self, prefix: &str, code: &str) {
        self.script
            .lock()
            .failing_statements
            .push((prefix.to_string(), code.to_string()));
    }

    /// Statements starting with `prefix` return `execution`
    pub fn respond(&self, prefix: &str, execution: Execution) {
        self.script
            .lock()
            .responses
            .push((prefix.to_string(), execution));
    }

    /// Hosts a connect was attempted against, in order
    pub fn attempts(&self) -> Vec<String> {
        self.script.lock().attempts.clone()
    }

    /// Targets of successful connects, in order
    pub fn targets(&self) -> Vec<ConnectTarget> {
        self.script.lock().targets.clone()
    }

    /// Successful connects
    pub fn connects(&self) -> usize {
        self.script.lock().connects
    }

    /// Closed connections
    pub fn closes(&self) -> usize {
        self.script.lock().closes
    }

    /// Pings sent to `host`
    pub fn pings(&self, host: &str) -> usize {
        self.script.lock().pings.get(host).copied().unwrap_or(0)
    }

    /// Statements executed on `host`, in order
    pub fn executed(&self, host: &str) -> Vec<String> {
        self.script
            .lock()
            .executed
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    /// Open a connection to `host` with placeholder credentials
    pub async fn open(&self, host: &str) -> Result<Box<dyn DriverConnection>> {
        let target = ConnectTarget {
            host: host.to_string(),
            port: 5432,
            username: "app".into(),
            password: None,
            database: "shop".into(),
            options: Default::default(),
            persistent: false,
        };
        self.connect(&target).await
    }
}

impl Driver for ScriptedDriver {
    fn connect<'a>(
        &'a self,
        target: &'a ConnectTarget,
    ) -> BoxFuture<'a, Result<Box<dyn DriverConnection>>> {
        async move {
            let hang = {
                let mut script = self.script.lock();
                script.attempts.push(target.host.clone());
                if script.refused.contains(&target.host) {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        format!("connection refused: {}", target.host),
                    )));
                }
                if let Some(code) = script.rejected.get(&target.host) {
                    return Err(Error::Server(ServerError::new(
                        code.clone(),
                        format!("rejected by {}", target.host),
                    )));
                }
                script.hanging.contains(&target.host)
            };
            if hang {
                futures::future::pending::<()>().await;
            }

            let mut script = self.script.lock();
            script.connects += 1;
            script.targets.push(target.clone());
            Ok(Box::new(ScriptedConnection {
                host: target.host.clone(),
                dialect: self.dialect,
                script: Arc::clone(&self.script),
                closed: false,
            }) as Box<dyn DriverConnection>)
        }
        .boxed()
    }
}

struct ScriptedConnection {
    host: String,
    dialect: Dialect,
    script: Arc<Mutex<Script>>,
    closed: bool,
}

impl ScriptedConnection {
    fn run(&mut self, sql: &str) -> Result<Execution> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let mut script = self.script.lock();
        script
            .executed
            .entry(self.host.clone())
            .or_default()
            .push(sql.to_string());

        if let Some((_, code)) = script
            .failing_statements
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
        {
            return Err(Error::Server(ServerError::new(
                code.clone(),
                format!("statement failed: {}", sql),
            )));
        }
        let execution = script
            .responses
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, execution)| execution.clone())
            .unwrap_or_else(|| Execution {
                rows: Some(ResultSet::default()),
                ..Execution::default()
            });
        Ok(execution)
    }
}

impl DriverConnection for ScriptedConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Execution>> {
        let result = self.run(sql);
        async move { result }.boxed()
    }

    fn ping(&mut self) -> BoxFuture<'_, Result<()>> {
        let result = {
            let mut script = self.script.lock();
            *script.pings.entry(self.host.clone()).or_default() += 1;
            if self.closed || script.failing_pings.contains(&self.host) {
                Err(Error::ConnectionClosed)
            } else {
                Ok(())
            }
        };
        async move { result }.boxed()
    }

    fn set_charset<'a>(&'a mut self, charset: &'a str) -> BoxFuture<'a, Result<()>> {
        let result = self.run(&format!("SET NAMES {}", charset)).map(|_| ());
        async move { result }.boxed()
    }

    fn select_database<'a>(&'a mut self, database: &'a str) -> BoxFuture<'a, Result<()>> {
        let result = self.run(&format!("USE {}", database)).map(|_| ());
        async move { result }.boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        if !self.closed {
            self.closed = true;
            self.script.lock().closes += 1;
        }
        async { Ok(()) }.boxed()
    }
}
