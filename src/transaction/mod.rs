//! Nested transactions on top of savepoints
//!
//! Every connection key owns a [`TransactionStack`]. The first transaction
//! started on a connection is the root and issues the real BEGIN/COMMIT;
//! later ones are savepoints. Root-ness is decided by stack position, not by
//! which [`Transaction`] handle is asking.

mod stack;

pub use stack::TransactionStack;

use crate::metrics::labels::{LEVEL_ROOT, LEVEL_SAVEPOINT};
use crate::pool::{ConnectionEntry, ConnectionKey};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

type Stacks = Arc<Mutex<HashMap<ConnectionKey, TransactionStack>>>;

/// Unique id, usable as a savepoint name
fn next_id() -> String {
    format!(
        "sp_{:x}_{:08x}",
        NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed),
        rand::random::<u32>()
    )
}

/// Transaction stacks of every connection
#[derive(Debug, Default)]
pub struct TransactionManager {
    stacks: Stacks,
}

impl TransactionManager {
    /// Manager with no open transactions
    pub fn new() -> Self {
        Self::default()
    }

    /// New, unstarted transaction handle
    pub fn transaction(&self) -> Transaction {
        Transaction {
            stacks: Arc::clone(&self.stacks),
            id: None,
            conn: None,
        }
    }

    /// Whether any transaction is open on `key`
    pub fn is_active(&self, key: &ConnectionKey) -> bool {
        self.depth(key) > 0
    }

    /// Number of open transactions on `key`
    pub fn depth(&self, key: &ConnectionKey) -> usize {
        self.stacks.lock().get(key).map_or(0, TransactionStack::len)
    }

    /// Forget every transaction on `key` without issuing SQL.
    ///
    /// Used when the connection died; the server already rolled back.
    pub fn discard(&self, key: &ConnectionKey) {
        if let Some(stack) = self.stacks.lock().remove(key) {
            tracing::warn!(key = %key, open = stack.len(), "discarding transactions of dead connection");
        }
    }

    /// Forget every transaction on every connection
    pub fn clear(&self) {
        self.stacks.lock().clear();
    }
}

/// Handle on one (possibly nested) transaction.
///
/// A handle runs at most one transaction at a time; after commit or
/// rollback it can be started again.
#[derive(Debug)]
pub struct Transaction {
    stacks: Stacks,
    id: Option<String>,
    conn: Option<Arc<ConnectionEntry>>,
}

impl Transaction {
    /// Id of the running transaction
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether this handle's transaction is open
    pub fn is_active(&self) -> bool {
        match (&self.id, &self.conn) {
            (Some(id), Some(conn)) => self
                .stacks
                .lock()
                .get(conn.key())
                .is_some_and(|stack| stack.contains(id)),
            _ => false,
        }
    }

    /// Whether this handle was started but its transaction is gone.
    ///
    /// True after an enclosing transaction committed or rolled back, or the
    /// connection died. [`commit`](Self::commit) and
    /// [`rollback`](Self::rollback) on a stale handle send nothing and
    /// return `Ok(false)`.
    pub fn is_stale(&self) -> bool {
        self.id.is_some() && !self.is_active()
    }

    /// Whether this handle's transaction is the earliest one still open on
    /// its connection
    pub fn is_root(&self) -> bool {
        match (&self.id, &self.conn) {
            (Some(id), Some(conn)) => self
                .stacks
                .lock()
                .get(conn.key())
                .is_some_and(|stack| stack.is_root(id)),
            _ => false,
        }
    }

    /// Begin a transaction on `conn`, or a savepoint when one is already open.
    ///
    /// Fails with [`Error::Transaction`] when this handle already runs one.
    pub async fn start(&mut self, conn: &Arc<ConnectionEntry>) -> Result<()> {
        if self.is_active() {
            return Err(Error::Transaction(format!(
                "transaction {} already started",
                self.id.as_deref().unwrap_or_default()
            )));
        }

        let id = next_id();
        let root = {
            let mut stacks = self.stacks.lock();
            let stack = stacks.entry(conn.key().clone()).or_default();
            let root = stack.is_empty();
            stack.push(id.clone());
            root
        };

        let dialect = conn.dialect();
        let result = if root {
            run_all(conn, dialect.begin_statements().iter().map(|s| s.to_string())).await
        } else {
            conn.execute(&dialect.savepoint(&id)).await.map(|_| ())
        };

        if let Err(e) = result {
            let mut stacks = self.stacks.lock();
            if let Some(stack) = stacks.get_mut(conn.key()) {
                stack.truncate_from(&id);
                if stack.is_empty() {
                    stacks.remove(conn.key());
                }
            }
            return Err(e);
        }

        let level = if root { LEVEL_ROOT } else { LEVEL_SAVEPOINT };
        crate::metrics::counters::transaction_started(level);
        tracing::debug!(id = %id, connection = %conn.identity(), level, "transaction started");

        self.id = Some(id);
        self.conn = Some(Arc::clone(conn));
        Ok(())
    }

    /// Commit this transaction.
    ///
    /// The root first releases every open savepoint, most recent first, then
    /// commits and clears the connection's stack. A savepoint is released
    /// together with any savepoints started after it.
    ///
    /// Returns `Ok(false)` without sending anything when this handle was
    /// never started or is [stale](Self::is_stale).
    pub async fn commit(&mut self) -> Result<bool> {
        let Some((id, conn, root)) = self.resolve() else {
            return Ok(false);
        };
        let dialect = conn.dialect();

        if root {
            let children = self
                .stacks
                .lock()
                .get(conn.key())
                .map(TransactionStack::children_lifo)
                .unwrap_or_default();
            let statements = children
                .iter()
                .map(|child| dialect.release_savepoint(child))
                .chain(dialect.commit_statements().iter().map(|s| s.to_string()));

            let result = run_all(&conn, statements).await;
            self.stacks.lock().remove(conn.key());
            result?;

            crate::metrics::counters::transaction_committed(LEVEL_ROOT);
            tracing::debug!(id = %id, released = children.len(), "transaction committed");
        } else {
            let result = conn.execute(&dialect.release_savepoint(&id)).await;
            self.pop(&conn, &id);
            result?;

            crate::metrics::counters::transaction_committed(LEVEL_SAVEPOINT);
            tracing::debug!(id = %id, "savepoint released");
        }
        Ok(true)
    }

    /// Roll back this transaction.
    ///
    /// The root rolls back and clears the connection's stack, invalidating
    /// every nested handle. A savepoint rolls back to itself and is released;
    /// its parents stay open.
    ///
    /// Returns `Ok(false)` without sending anything when this handle was
    /// never started or is [stale](Self::is_stale).
    pub async fn rollback(&mut self) -> Result<bool> {
        let Some((id, conn, root)) = self.resolve() else {
            return Ok(false);
        };
        let dialect = conn.dialect();

        if root {
            let result = run_all(
                &conn,
                dialect.rollback_statements().iter().map(|s| s.to_string()),
            )
            .await;
            self.stacks.lock().remove(conn.key());
            result?;

            crate::metrics::counters::transaction_rolled_back(LEVEL_ROOT);
            tracing::debug!(id = %id, "transaction rolled back");
        } else {
            let result = run_all(
                &conn,
                [dialect.rollback_to_savepoint(&id), dialect.release_savepoint(&id)],
            )
            .await;
            self.pop(&conn, &id);
            result?;

            crate::metrics::counters::transaction_rolled_back(LEVEL_SAVEPOINT);
            tracing::debug!(id = %id, "rolled back to savepoint");
        }
        Ok(true)
    }

    /// Take this handle's id and connection if its transaction is still open
    fn resolve(&mut self) -> Option<(String, Arc<ConnectionEntry>, bool)> {
        let id = self.id.take()?;
        let conn = self.conn.take()?;
        let root = {
            let stacks = self.stacks.lock();
            let stack = stacks.get(conn.key()).filter(|stack| stack.contains(&id));
            match stack {
                Some(stack) => stack.is_root(&id),
                None => {
                    tracing::debug!(id = %id, "transaction no longer open");
                    return None;
                }
            }
        };
        Some((id, conn, root))
    }

    fn pop(&self, conn: &ConnectionEntry, id: &str) {
        let mut stacks = self.stacks.lock();
        if let Some(stack) = stacks.get_mut(conn.key()) {
            stack.truncate_from(id);
            if stack.is_empty() {
                stacks.remove(conn.key());
            }
        }
    }
}

async fn run_all(
    conn: &ConnectionEntry,
    statements: impl IntoIterator<Item = String>,
) -> Result<()> {
    for sql in statements {
        conn.execute(&sql).await?;
    }
    Ok(())
}
