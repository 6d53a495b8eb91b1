use crate::db::{DbError, SqlBackend};
use crate::schema::Row;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

/// Row cap for final execution.
pub const DEFAULT_ROW_LIMIT: usize = 100;
/// Row cap for validation dry-runs.
pub const VALIDATION_ROW_LIMIT: usize = 3;

static SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bselect\b").expect("select pattern is valid"));
static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\blimit\b").expect("limit pattern is valid"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub final_sql: String,
    pub rows: Vec<Row>,
    pub rowcount: usize,
}

/// Keyword allow-list. This is a cheap first filter, not a parser: the
/// read-only guard in the backend is the real boundary.
pub fn ensure_select(sql: &str) -> Result<(), DbError> {
    if SELECT_RE.is_match(sql) {
        Ok(())
    } else {
        Err(DbError::DisallowedStatement)
    }
}

/// Appends `LIMIT n` when the statement has no LIMIT clause.
///
/// The clause goes on its own line so a trailing `--` comment cannot
/// swallow it. Text inside line comments does not count as a LIMIT.
pub fn with_default_limit(sql: &str, limit: usize) -> String {
    if LIMIT_RE.is_match(&strip_line_comments(sql)) {
        return sql.to_string();
    }
    let body = sql.trim_end().trim_end_matches(';').trim_end();
    format!("{}\nLIMIT {};", body, limit)
}

fn strip_line_comments(sql: &str) -> String {
    sql.lines()
        .map(|line| line.split_once("--").map_or(line, |(code, _)| code))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Safety gate in front of the database.
#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn SqlBackend>,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self { backend }
    }

    /// Runs a SELECT with a default row cap under the read-only guard.
    pub async fn run_select(&self, sql: &str, limit_default: usize) -> Result<Vec<Row>, DbError> {
        ensure_select(sql)?;
        let bounded = with_default_limit(sql, limit_default);
        debug!("Running read-only statement: {}", bounded);

        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.query(&bounded))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }

    /// Cheap validity check: plans the statement without producing rows.
    pub async fn explain(&self, sql: &str) -> Result<String, DbError> {
        ensure_select(sql)?;
        let sql = sql.to_string();

        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.explain(&sql))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }

    pub async fn execute(&self, sql: &str, limit_default: usize) -> Result<ExecutionResult, DbError> {
        let rows = self.run_select(sql, limit_default).await?;
        info!("Query returned {} rows", rows.len());

        Ok(ExecutionResult {
            final_sql: sql.to_string(),
            rowcount: rows.len(),
            rows,
        })
    }
}
