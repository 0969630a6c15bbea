//! Database utilities for connections, pooling and schema migrations.
//!
//! This module provides:
//! - SQLite connection helpers: [`connection::connect_sqlite`] applies WAL, foreign_keys=ON, and a 5000ms busy_timeout.
//! - A bounded pool with per-operation checkout: [`pool::DbPool`].
//! - Embedded Diesel migrations and runners: [`migrate::run_sqlite`] and [`migrate::run_all`].
//!
//! Example:
//! ```no_run
//! use fetch_engine::db::{migrate, pool::DbPool};
//!
//! let db_path = std::env::temp_dir().join("fetch_engine_example.db");
//! migrate::run_all(db_path.to_str().unwrap()).expect("migrations");
//! let _pool = DbPool::open(db_path.to_str().unwrap(), 4).expect("pool");
//! ```

pub mod connection;
pub mod migrate;
pub mod pool;
