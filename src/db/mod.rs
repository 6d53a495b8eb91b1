pub mod db_pool;
pub mod duckdb_backend;
pub mod executor;
pub mod introspect;
pub mod rows;

use crate::schema::Row;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Only SELECT statements are allowed.")]
    DisallowedStatement,
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("{0}")]
    Database(#[from] duckdb::Error),
    #[error("failed to decode result rows: {0}")]
    Decode(String),
    #[error("database task failed: {0}")]
    Task(String),
}

/// Read-only access to the database.
///
/// Implementations must run every statement under a read-only guard enforced
/// by the database itself; the keyword checks in the executor are only a
/// first filter.
pub trait SqlBackend: Send + Sync {
    /// Runs `sql` and returns every row it produces.
    fn query(&self, sql: &str) -> Result<Vec<Row>, DbError>;

    /// Runs `EXPLAIN` for `sql` without materializing its rows.
    fn explain(&self, sql: &str) -> Result<String, DbError>;
}
