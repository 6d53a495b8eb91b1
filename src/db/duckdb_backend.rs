use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::introspect::load_schema_snapshot;
use crate::db::rows::query_rows;
use crate::db::{DbError, SqlBackend};
use crate::schema::cache::{IntrospectionError, Introspector};
use crate::schema::{Row, SchemaSnapshot};
use async_trait::async_trait;
use r2d2::Pool;
use serde_json::Value;
use tracing::debug;

/// DuckDB-backed database collaborator.
///
/// Connections come from a read-only pool; each statement additionally runs
/// in its own transaction that is always rolled back.
#[derive(Clone)]
pub struct DuckDbBackend {
    pool: Pool<DuckDBConnectionManager>,
    schema: String,
}

impl DuckDbBackend {
    pub fn new(pool: Pool<DuckDBConnectionManager>, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

impl SqlBackend for DuckDbBackend {
    fn query(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let rows = {
            let mut stmt = tx.prepare(sql)?;
            query_rows(&mut stmt, &[])?
        };

        tx.rollback()?;
        debug!("Statement returned {} rows", rows.len());
        Ok(rows)
    }

    fn explain(&self, sql: &str) -> Result<String, DbError> {
        let rows = self.query(&format!("EXPLAIN {}", sql))?;

        let plan = rows
            .iter()
            .flat_map(|row| row.values())
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(plan)
    }
}

#[async_trait]
impl Introspector for DuckDbBackend {
    async fn introspect(&self) -> Result<SchemaSnapshot, IntrospectionError> {
        let pool = self.pool.clone();
        let schema = self.schema.clone();

        tokio::task::spawn_blocking(move || -> Result<SchemaSnapshot, DbError> {
            let conn = pool.get()?;
            load_schema_snapshot(&conn, &schema)
        })
        .await
        .map_err(|e| IntrospectionError(e.to_string()))?
        .map_err(IntrospectionError::from)
    }
}
