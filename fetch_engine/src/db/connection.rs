//! SQLite connection helpers.
//!
//! Provides [`connect_sqlite`] that opens a connection and applies the
//! connection-wide PRAGMAs the engine relies on: WAL journaling,
//! foreign_keys=ON, and a 5000ms busy_timeout.
//!
//! Example:
//! ```no_run
//! use fetch_engine::db::connection::connect_sqlite;
//!
//! let path = std::env::temp_dir().join("fetch_engine_example.db");
//! let _conn = connect_sqlite(path.to_str().unwrap()).expect("open sqlite");
//! ```

use diesel::{Connection, RunQueryDsl, SqliteConnection, sql_query};

/// Strip an optional `sqlite://` / `sqlite:` scheme so the URL can be handed to SQLite.
pub fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Apply the per-connection PRAGMAs.
pub fn apply_pragmas(conn: &mut SqliteConnection) -> diesel::QueryResult<()> {
    // Better read concurrency for the many-workers/one-file layout
    sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}

/// Open a SQLite connection and apply connection-wide PRAGMAs.
pub fn connect_sqlite(database_url: &str) -> anyhow::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(sqlite_path(database_url))?;
    apply_pragmas(&mut conn)?;
    Ok(conn)
}
