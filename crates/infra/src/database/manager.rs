//! SQLite connection pool management.

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use pacer_domain::{PacerError, Result};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Owns the connection pool and applies the schema on startup.
///
/// Connections are handed out synchronously; callers doing blocking SQLite
/// work from async contexts must wrap it in `spawn_blocking`.
pub struct DbManager {
    pool: Pool<SqliteConnectionManager>,
}

impl DbManager {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .map_err(|e| PacerError::Database(format!("failed to build pool: {e}")))?;

        let db = Self { pool };
        db.apply_schema()?;
        info!(path = %path.as_ref().display(), pool_size, "database ready");
        Ok(db)
    }

    /// In-memory database for tests. Pool size is pinned to 1 so every
    /// connection sees the same data.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| PacerError::Database(format!("failed to build pool: {e}")))?;
        let db = Self { pool };
        db.apply_schema()?;
        Ok(db)
    }

    fn apply_schema(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| PacerError::Database(format!("schema migration failed: {e}")))
    }

    pub fn get_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| PacerError::Database(format!("connection checkout failed: {e}")))
    }
}
