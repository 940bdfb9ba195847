//! Reference-counted table of live connections

use super::key::ConnectionKey;
use crate::driver::{Dialect, DriverConnection, Execution};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct SessionState {
    database: Option<String>,
    charset: Option<String>,
    last_checked: Instant,
}

/// One physical connection and its cached session state
#[derive(Debug)]
pub struct ConnectionEntry {
    id: u64,
    key: ConnectionKey,
    dialect: Dialect,
    conn: tokio::sync::Mutex<Box<dyn DriverConnection>>,
    refs: AtomicUsize,
    session: Mutex<SessionState>,
}

impl ConnectionEntry {
    /// Wrap a freshly opened connection whose session started on `database`
    pub fn new(
        key: ConnectionKey,
        conn: Box<dyn DriverConnection>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            key,
            dialect: conn.dialect(),
            conn: tokio::sync::Mutex::new(conn),
            refs: AtomicUsize::new(0),
            session: Mutex::new(SessionState {
                database: Some(database.into()),
                charset: None,
                last_checked: Instant::now(),
            }),
        }
    }

    /// Unique id; a reconnect to the same key yields a different id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pooling identity
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// `user@host:port`
    pub fn identity(&self) -> String {
        format!("{}@{}", self.key.username, self.key.addr())
    }

    /// SQL flavour of the connection
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Number of registry references
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Currently selected database
    pub fn database(&self) -> Option<String> {
        self.session.lock().database.clone()
    }

    /// Currently selected charset
    pub fn charset(&self) -> Option<String> {
        self.session.lock().charset.clone()
    }

    /// When the connection was last known alive
    pub fn last_checked(&self) -> Instant {
        self.session.lock().last_checked
    }

    /// Record a successful liveness check
    pub fn mark_checked(&self) {
        self.session.lock().last_checked = Instant::now();
    }

    /// Run one statement
    pub async fn execute(&self, sql: &str) -> Result<Execution> {
        self.conn.lock().await.execute(sql).await
    }

    /// Liveness round-trip
    pub async fn ping(&self) -> Result<()> {
        self.conn.lock().await.ping().await
    }

    /// Set the session charset unless it is already selected
    pub async fn set_charset(&self, charset: &str) -> Result<()> {
        if self.session.lock().charset.as_deref() == Some(charset) {
            return Ok(());
        }
        self.conn.lock().await.set_charset(charset).await?;
        self.session.lock().charset = Some(charset.to_string());
        Ok(())
    }

    /// Switch database unless it is already selected
    pub async fn select_database(&self, database: &str) -> Result<()> {
        if self.session.lock().database.as_deref() == Some(database) {
            return Ok(());
        }
        self.conn.lock().await.select_database(database).await?;
        self.session.lock().database = Some(database.to_string());
        Ok(())
    }

    /// Close the physical connection
    pub async fn close(&self) {
        if let Err(e) = self.conn.lock().await.close().await {
            tracing::debug!(connection = %self.identity(), "error while closing: {}", e);
        }
    }
}

/// Process-wide table of live connections, keyed by [`ConnectionKey`]
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ConnectionKey, Arc<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference to the entry for `key`, opening one with `open` when
    /// none exists.
    ///
    /// `open` runs without the registry lock. When another caller registers
    /// the same key meanwhile, that entry is shared and the fresh connection
    /// is closed.
    pub async fn acquire<F, Fut>(&self, key: &ConnectionKey, open: F) -> Result<Arc<ConnectionEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ConnectionEntry>>,
    {
        if let Some(entry) = self.try_acquire(key) {
            return Ok(entry);
        }

        let fresh = Arc::new(open().await?);

        let (entry, duplicate) = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(existing) => {
                    existing.refs.fetch_add(1, Ordering::AcqRel);
                    (Arc::clone(existing), Some(fresh))
                }
                None => {
                    fresh.refs.store(1, Ordering::Release);
                    entries.insert(key.clone(), Arc::clone(&fresh));
                    crate::metrics::gauges::registry_size(entries.len());
                    (fresh, None)
                }
            }
        };

        if let Some(duplicate) = duplicate {
            tracing::debug!(key = %key, "connection registered concurrently, closing duplicate");
            duplicate.close().await;
        }
        Ok(entry)
    }

    /// Take a reference to an existing entry
    pub fn try_acquire(&self, key: &ConnectionKey) -> Option<Arc<ConnectionEntry>> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        entry.refs.fetch_add(1, Ordering::AcqRel);
        Some(Arc::clone(entry))
    }

    /// Read-only probe; does not change the reference count
    pub fn lookup(&self, key: &ConnectionKey) -> Option<Arc<ConnectionEntry>> {
        self.entries.lock().get(key).cloned()
    }

    /// Whether `entry` is still the connection registered for its key
    pub fn is_current(&self, entry: &ConnectionEntry) -> bool {
        self.entries
            .lock()
            .get(&entry.key)
            .is_some_and(|current| current.id == entry.id)
    }

    /// Drop one reference to `key`, closing the connection at zero.
    ///
    /// Releasing an unknown key is a no-op.
    pub async fn release(&self, key: &ConnectionKey) {
        let closed = {
            let mut entries = self.entries.lock();
            Self::decrement(&mut entries, key)
        };
        if let Some(entry) = closed {
            entry.close().await;
        }
    }

    /// Drop one reference to `entry`, unless its key now maps to a
    /// different connection (it was evicted and reconnected).
    pub async fn release_entry(&self, entry: &ConnectionEntry) {
        let closed = {
            let mut entries = self.entries.lock();
            match entries.get(&entry.key) {
                Some(current) if current.id == entry.id => Self::decrement(&mut entries, &entry.key),
                _ => None,
            }
        };
        if let Some(entry) = closed {
            entry.close().await;
        }
    }

    fn decrement(
        entries: &mut HashMap<ConnectionKey, Arc<ConnectionEntry>>,
        key: &ConnectionKey,
    ) -> Option<Arc<ConnectionEntry>> {
        let entry = entries.get(key)?;
        if entry.refs.fetch_sub(1, Ordering::AcqRel) > 1 {
            return None;
        }
        let entry = entries.remove(key);
        crate::metrics::gauges::registry_size(entries.len());
        tracing::debug!(key = %key, "last reference released, closing connection");
        entry
    }

    /// Remove `entry` regardless of its reference count and close it.
    ///
    /// Returns `false` when the key no longer maps to this connection.
    pub async fn evict(&self, entry: &ConnectionEntry) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(&entry.key) {
                Some(current) if current.id == entry.id => {
                    let removed = entries.remove(&entry.key);
                    crate::metrics::gauges::registry_size(entries.len());
                    removed
                }
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                entry.refs.store(0, Ordering::Release);
                crate::metrics::counters::connection_evicted(&entry.identity());
                tracing::warn!(connection = %entry.identity(), "evicting dead connection");
                entry.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every connection
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock();
            let drained = entries.drain().map(|(_, entry)| entry).collect();
            crate::metrics::gauges::registry_size(0);
            drained
        };
        for entry in drained {
            entry.refs.store(0, Ordering::Release);
            entry.close().await;
        }
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no connection is open
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostAddr;
    use crate::testing::ScriptedDriver;

    fn key(host: &str) -> ConnectionKey {
        ConnectionKey::new(&HostAddr::new(host, 5432), "app", false)
    }

    async fn open(driver: &ScriptedDriver, key: &ConnectionKey) -> Result<ConnectionEntry> {
        let conn = driver.open(&key.host).await?;
        Ok(ConnectionEntry::new(key.clone(), conn, "shop"))
    }

    #[tokio::test]
    async fn test_acquire_release_balances() {
        let driver = ScriptedDriver::new();
        let registry = ConnectionRegistry::new();
        let k = key("db1");

        for _ in 0..3 {
            registry.acquire(&k, || open(&driver, &k)).await.unwrap();
        }
        assert_eq!(driver.connects(), 1);
        assert_eq!(registry.lookup(&k).unwrap().ref_count(), 3);

        for _ in 0..3 {
            registry.release(&k).await;
        }
        assert!(registry.lookup(&k).is_none());
        assert!(registry.is_empty());
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn test_release_unknown_key_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.release(&key("nowhere")).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_does_not_change_refcount() {
        let driver = ScriptedDriver::new();
        let registry = ConnectionRegistry::new();
        let k = key("db1");
        registry.acquire(&k, || open(&driver, &k)).await.unwrap();

        let entry = registry.lookup(&k).unwrap();
        assert_eq!(entry.ref_count(), 1);
        assert_eq!(registry.lookup(&k).unwrap().ref_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_registers_nothing() {
        let driver = ScriptedDriver::new();
        driver.refuse("db1");
        let registry = ConnectionRegistry::new();
        let k = key("db1");

        assert!(registry.acquire(&k, || open(&driver, &k)).await.is_err());
        assert!(registry.lookup(&k).is_none());
    }

    #[tokio::test]
    async fn test_evicted_entry_release_is_ignored() {
        let driver = ScriptedDriver::new();
        let registry = ConnectionRegistry::new();
        let k = key("db1");

        let old = registry.acquire(&k, || open(&driver, &k)).await.unwrap();
        registry.acquire(&k, || open(&driver, &k)).await.unwrap();
        assert!(registry.evict(&old).await);
        assert!(!registry.evict(&old).await);

        assert!(!registry.is_current(&old));

        let fresh = registry.acquire(&k, || open(&driver, &k)).await.unwrap();
        assert_ne!(fresh.id(), old.id());
        assert!(registry.is_current(&fresh));
        assert!(!registry.is_current(&old));

        // stale release must not touch the reconnected entry
        registry.release_entry(&old).await;
        assert_eq!(registry.lookup(&k).unwrap().ref_count(), 1);

        registry.release_entry(&fresh).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_session_state_is_cached() {
        let driver = ScriptedDriver::new();
        let registry = ConnectionRegistry::new();
        let k = key("db1");
        let entry = registry.acquire(&k, || open(&driver, &k)).await.unwrap();

        entry.set_charset("UTF8").await.unwrap();
        entry.set_charset("UTF8").await.unwrap();
        entry.select_database("shop").await.unwrap();
        assert_eq!(driver.executed("db1"), vec!["SET NAMES UTF8".to_string()]);
        assert_eq!(entry.charset().as_deref(), Some("UTF8"));
        assert_eq!(entry.identity(), "app@db1:5432");
    }

    #[tokio::test]
    async fn test_concurrent_acquire_shares_one_entry() {
        let driver = ScriptedDriver::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let k = key("db1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let driver = driver.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .acquire(&k, || open(&driver, &k))
                    .await
                    .map(|e| e.id())
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.lookup(&k).unwrap().ref_count(), 8);
        assert_eq!(driver.connects() - driver.closes(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let driver = ScriptedDriver::new();
        let registry = ConnectionRegistry::new();
        for host in ["db1", "db2"] {
            let k = key(host);
            registry.acquire(&k, || open(&driver, &k)).await.unwrap();
        }
        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(driver.closes(), 2);
    }
}
