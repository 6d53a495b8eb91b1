//! Fakes shared by unit tests across modules.

use crate::agent::ConversationTurn;
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::duckdb_backend::DuckDbBackend;
use crate::db::{DbError, SqlBackend};
use crate::llm::{LanguageModel, LlmError};
use crate::schema::cache::{
    Clock, IntrospectionError, Introspector, SnapshotStore, StoreError, StoredSnapshot,
};
use crate::schema::{Column, ForeignKey, Row, SchemaSnapshot, Table};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tempfile::TempDir;

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn turn(question: &str, rowcount: usize) -> ConversationTurn {
    ConversationTurn {
        original_question: question.to_string(),
        rephrased_question: format!("{} (rephrased)", question),
        final_sql: "SELECT 1".to_string(),
        result_preview: Vec::new(),
        rowcount,
        timestamp_iso: "2024-06-01T00:00:00+00:00".to_string(),
    }
}

fn column(name: &str, data_type: &str, nullable: bool) -> Column {
    Column {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        default: None,
    }
}

/// `customers` and `orders`, with `orders.customer_id → customers.id`.
pub fn shop_snapshot() -> SchemaSnapshot {
    let mut customers = Table::new("customers");
    customers.columns = vec![
        column("id", "INTEGER", false),
        column("name", "VARCHAR", true),
    ];
    customers.primary_key = vec!["id".to_string()];
    customers.sample_rows = vec![row(&[("id", 1.into()), ("name", "Ann".into())])];

    let mut orders = Table::new("orders");
    orders.columns = vec![
        column("id", "INTEGER", false),
        column("customer_id", "INTEGER", true),
        column("total", "DOUBLE", true),
        column("created_at", "TIMESTAMP", true),
    ];
    orders.primary_key = vec!["id".to_string()];
    orders.foreign_keys = vec![ForeignKey {
        table: "orders".to_string(),
        column: "customer_id".to_string(),
        ref_table: "customers".to_string(),
        ref_column: "id".to_string(),
    }];

    let mut snap = SchemaSnapshot::new("main");
    snap.tables.insert("customers".to_string(), customers);
    snap.tables.insert("orders".to_string(), orders);
    snap
}

/// A DuckDB file seeded with `orders` (3 rows) and `events` (a TIMESTAMPTZ
/// column), served through the read-only pool. Keep the `TempDir` alive.
pub fn seeded_duckdb() -> (TempDir, DuckDbBackend) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shop.duckdb");
    {
        let conn = duckdb::Connection::open(&path).unwrap();
        conn.execute_batch(
            "
            CREATE TABLE orders (id INTEGER PRIMARY KEY, total DOUBLE, qty INTEGER);
            INSERT INTO orders VALUES (1, 10.0, 4), (2, 12.5, 6), (3, 7.25, 9);
            CREATE TABLE events (id INTEGER, happened_at TIMESTAMPTZ);
            INSERT INTO events VALUES (1, TIMESTAMPTZ '2024-06-01 12:00:00+00');
            ",
        )
        .unwrap();
    }

    let manager = DuckDBConnectionManager::new(path.to_string_lossy().to_string());
    let pool = r2d2::Pool::builder().max_size(2).build(manager).unwrap();
    (dir, DuckDbBackend::new(pool, "main"))
}

/// Replays canned completions in order and records every prompt.
/// Errors once the script runs dry.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::ConnectionError("script exhausted".to_string()))
    }
}

enum Outcome {
    Rows(Vec<Row>),
    Error(String),
}

/// Backend that matches statements against case-insensitive substrings.
/// Rules are checked in insertion order; the first match wins. Error rules
/// apply to `explain` too. Unmatched queries return no rows.
pub struct FakeBackend {
    rules: Vec<(String, Outcome)>,
    statements: Mutex<Vec<String>>,
    explains: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            statements: Mutex::new(Vec::new()),
            explains: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rows(mut self, needle: &str, rows: Vec<Row>) -> Self {
        self.rules.push((needle.to_lowercase(), Outcome::Rows(rows)));
        self
    }

    pub fn with_error(mut self, needle: &str, message: &str) -> Self {
        self.rules
            .push((needle.to_lowercase(), Outcome::Error(message.to_string())));
        self
    }

    /// Statements passed to `query`, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn explains(&self) -> Vec<String> {
        self.explains.lock().unwrap().clone()
    }

    fn matching(&self, sql: &str) -> Option<&Outcome> {
        let haystack = sql.to_lowercase();
        self.rules
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, outcome)| outcome)
    }
}

impl SqlBackend for FakeBackend {
    fn query(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        self.statements.lock().unwrap().push(sql.to_string());
        match self.matching(sql) {
            Some(Outcome::Rows(rows)) => Ok(rows.clone()),
            Some(Outcome::Error(msg)) => Err(DbError::Decode(msg.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn explain(&self, sql: &str) -> Result<String, DbError> {
        self.explains.lock().unwrap().push(sql.to_string());
        match self.matching(sql) {
            Some(Outcome::Error(msg)) => Err(DbError::Decode(msg.clone())),
            _ => Ok("PLAN".to_string()),
        }
    }
}

/// Introspector returning a settable snapshot, or a settable failure.
pub struct CountingIntrospector {
    result: Mutex<Result<SchemaSnapshot, String>>,
    calls: Mutex<usize>,
}

impl CountingIntrospector {
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self {
            result: Mutex::new(Ok(snapshot)),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn set_snapshot(&self, snapshot: SchemaSnapshot) {
        *self.result.lock().unwrap() = Ok(snapshot);
    }

    pub fn fail_with(&self, message: &str) {
        *self.result.lock().unwrap() = Err(message.to_string());
    }
}

#[async_trait]
impl Introspector for CountingIntrospector {
    async fn introspect(&self) -> Result<SchemaSnapshot, IntrospectionError> {
        *self.calls.lock().unwrap() += 1;
        self.result
            .lock()
            .unwrap()
            .clone()
            .map_err(IntrospectionError)
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    stored: Mutex<Option<StoredSnapshot>>,
    saves: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<StoredSnapshot>, StoreError> {
        Ok(self.stored.lock().unwrap().clone())
    }

    fn save(&self, snapshot: &SchemaSnapshot, at: DateTime<Utc>) -> Result<(), StoreError> {
        *self.stored.lock().unwrap() = Some(StoredSnapshot {
            snapshot: snapshot.clone(),
            written_at: at,
        });
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

/// Clock that only moves when told to. Starts at 2024-06-01T00:00:00Z.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
