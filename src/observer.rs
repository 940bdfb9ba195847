//! Per-statement telemetry hook

use crate::router::Cluster;
use crate::Error;
use std::time::Duration;

/// One executed statement
#[derive(Debug)]
pub struct QueryEvent<'a> {
    /// Statement text
    pub sql: &'a str,
    /// Wall time spent executing
    pub duration: Duration,
    /// `user@host:port` of the connection used
    pub connection: &'a str,
    /// Cluster the statement was routed to
    pub cluster: &'a Cluster,
    /// Failure, if the statement failed
    pub error: Option<&'a Error>,
}

impl QueryEvent<'_> {
    /// Whether the statement succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives an event for every statement a [`crate::Database`] runs.
///
/// Called inline after the statement completes; keep it cheap.
pub trait QueryObserver: Send + Sync + 'static {
    /// Handle one event
    fn on_query(&self, event: &QueryEvent<'_>);
}

impl<F> QueryObserver for F
where
    F: Fn(&QueryEvent<'_>) + Send + Sync + 'static,
{
    fn on_query(&self, event: &QueryEvent<'_>) {
        self(event)
    }
}
