//! Bounded connection pool shared by all workers.
//!
//! Every database operation checks a connection out, uses it, and returns it
//! before any network round trip happens. Checkouts run on the blocking
//! thread pool via [`DbPool::run`], so a slow query never stalls a worker's
//! async executor thread.
//!
//! SQLite admits one writer at a time; mutations additionally go through
//! [`DbPool::run_write`], which serialises them behind a process-wide mutex
//! instead of leaning on `SQLITE_BUSY` retries.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Context;
use diesel::{
    SqliteConnection,
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
};

use crate::db::connection::{apply_pragmas, sqlite_path};

/// A pooled SQLite connection.
pub type PooledSqlite = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug, Clone, Copy)]
struct Pragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for Pragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        apply_pragmas(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Cloneable handle to the pool.
#[derive(Clone)]
pub struct DbPool {
    pool: Pool<ConnectionManager<SqliteConnection>>,
    write_lock: Arc<Mutex<()>>,
}

impl DbPool {
    /// Open a pool of at most `max_size` connections to `database_url`.
    pub fn open(database_url: &str, max_size: u32) -> anyhow::Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(sqlite_path(database_url));
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(Pragmas))
            .build(manager)
            .with_context(|| format!("open sqlite pool at {database_url}"))?;
        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Configured upper bound on open connections.
    pub fn max_size(&self) -> u32 {
        self.pool.max_size()
    }

    /// Run `f` with a checked-out connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("checkout sqlite connection")?;
            f(&mut *conn)
        })
        .await
        .context("database task panicked")?
    }

    /// Like [`DbPool::run`], serialised against every other mutation.
    pub async fn run_write<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        let lock = Arc::clone(&self.write_lock);
        tokio::task::spawn_blocking(move || {
            // guards no data, so poisoning is ignored
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut conn = pool.get().context("checkout sqlite connection")?;
            f(&mut *conn)
        })
        .await
        .context("database task panicked")?
    }
}
