//! SQLite storage and the transaction boundary
//!
//! ## Units of work
//!
//! Every use case runs through [`Database::run`], which hands a fresh
//! [`Session`] to a closure on the blocking pool. Inside, the closure either
//! reads through [`Session::conn`] or opens a [`WriteTx`] with
//! [`Session::begin`] and passes that handle to each accessor it calls.
//!
//! - `BEGIN IMMEDIATE` takes SQLite's writer lock up front. Competing writers
//!   retry under SQLite's busy handler, so they are serialized in the order
//!   they win the lock rather than the order they asked for it. Waiting is
//!   bounded by the configured lock timeout, after which the writer fails
//!   with [`StoreError::LockTimeout`].
//! - A `WriteTx` that is dropped without `commit()` rolls back.
//! - If the future awaiting `run` is dropped, the session's cancellation
//!   token fires. Any statement still running on the session's connection
//!   is interrupted, a writer that was waiting releases the lock as soon as
//!   it gets it, and `commit()` rolls back instead of committing.
//!
//! ## Isolation
//!
//! The journal runs in WAL mode. Reads outside a write transaction see the
//! most recent committed state as of each statement, so a multi-table delete
//! is either entirely visible or not at all.
//!
//! ## Tables
//!
//! - `accounts`, `posts`, `comments` - owned entities keyed by snowflake id
//! - `likes`, `follows` - composite-key facts
//! - `token_public_keys` - verification keys by key id

pub mod accounts;
pub mod comments;
pub mod follows;
pub mod likes;
pub mod posts;
pub mod public_keys;
pub mod schema;

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Handle to the SQLite database file
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    lock_timeout: Duration,
}

impl Database {
    /// Open or create the database and bring its schema up to date
    pub fn open(path: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self { path, lock_timeout };
        let conn = db.configure(conn)?;
        schema::init_schema(&conn)?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Run a unit of work on the blocking pool.
    ///
    /// Dropping the returned future cancels the session.
    pub async fn run<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        self.run_cancellable(cancel, f).await
    }

    /// Like [`Database::run`], under a caller-owned cancellation token
    pub async fn run_cancellable<F, T, E>(&self, cancel: CancellationToken, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = db.session(cancel)?;
            f(&mut session)
        })
        .await
        .map_err(|e| E::from(StoreError::Task(e.to_string())))?
    }

    fn session(&self, cancel: CancellationToken) -> Result<Session, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let conn = self.configure(Connection::open(&self.path)?)?;
        let watch = interrupt_on_cancel(&conn, &cancel);
        Ok(Session {
            conn,
            cancel,
            _watch: watch,
        })
    }

    fn configure(&self, conn: Connection) -> Result<Connection, StoreError> {
        conn.busy_timeout(self.lock_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }
}

/// Interrupt whatever `conn` is running once `cancel` fires.
///
/// The watcher stops when the returned guard drops. Outside a tokio runtime
/// there is nothing to drive it, and cancellation is only observed at
/// `begin` and `commit`.
fn interrupt_on_cancel(conn: &Connection, cancel: &CancellationToken) -> Option<DropGuard> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let interrupt = conn.get_interrupt_handle();
    let cancel = cancel.clone();
    let finished = CancellationToken::new();
    let done = finished.clone();

    runtime.spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Session cancelled, interrupting its connection");
                interrupt.interrupt();
            }
            _ = done.cancelled() => {}
        }
    });

    Some(finished.drop_guard())
}

/// One connection, scoped to a single unit of work
pub struct Session {
    conn: Connection,
    cancel: CancellationToken,
    // Declared after `conn` so the connection closes before the watcher stops
    _watch: Option<DropGuard>,
}

impl Session {
    /// Connection for unguarded reads
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Deferred read transaction, for reads that span several statements
    pub fn snapshot(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction_with_behavior(TransactionBehavior::Deferred)?)
    }

    /// Open a write transaction, waiting for the writer lock if necessary
    pub fn begin(&mut self) -> Result<WriteTx<'_>, StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| match StoreError::from(e) {
                StoreError::LockTimeout(detail) => {
                    warn!(%detail, "Timed out waiting for the write lock");
                    StoreError::LockTimeout(detail)
                }
                other => other,
            })?;

        // Cancelled while waiting for the lock: hand it straight back
        if self.cancel.is_cancelled() {
            debug!("Session cancelled while waiting for the write lock");
            tx.rollback()?;
            return Err(StoreError::Cancelled);
        }

        Ok(WriteTx {
            tx,
            cancel: self.cancel.clone(),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// An open write transaction holding the database writer lock.
///
/// Rolls back on drop unless committed.
pub struct WriteTx<'conn> {
    tx: Transaction<'conn>,
    cancel: CancellationToken,
}

impl WriteTx<'_> {
    /// `Cancelled` once the owning session has been cancelled
    pub fn ensure_active(&self) -> Result<(), StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        if self.cancel.is_cancelled() {
            debug!("Session cancelled before commit, rolling back");
            self.tx.rollback()?;
            return Err(StoreError::Cancelled);
        }
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback()?;
        Ok(())
    }
}

impl Deref for WriteTx<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Milliseconds since the unix epoch, the storage format for timestamps
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Ids are 63-bit snowflakes and fit SQLite's signed INTEGER
pub(crate) fn sql_id(id: u64) -> i64 {
    id as i64
}

#[cfg(test)]
pub(crate) fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    schema::init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
pub(crate) fn seed_account(conn: &Connection, id: u64) {
    conn.execute(
        "INSERT INTO accounts (id, account_name, password_hash, created_at) VALUES (?, ?, 'x', 0)",
        rusqlite::params![sql_id(id), format!("account-{}", id)],
    )
    .unwrap();
}
