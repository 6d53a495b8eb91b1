use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single result or sample row, keyed by column name in select order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Maximum number of sample rows kept per table.
pub const MAX_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// Directed edge `table.column -> ref_table.ref_column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Grounding only; never executed.
    #[serde(default)]
    pub sample_rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            sample_rows: Vec::new(),
        }
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    pub fn is_foreign_key(&self, column: &str) -> bool {
        self.foreign_keys.iter().any(|fk| fk.column == column)
    }
}

/// Point-in-time capture of one database schema.
///
/// Tables are held in a `BTreeMap` so iteration (and therefore rendering)
/// is always in lexicographic order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    #[serde(rename = "schema", alias = "schema_name")]
    pub schema_name: String,
    pub tables: BTreeMap<String, Table>,
}

impl SchemaSnapshot {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Foreign keys whose referenced table is not part of this snapshot.
    pub fn dangling_foreign_keys(&self) -> Vec<&ForeignKey> {
        self.tables
            .values()
            .flat_map(|t| t.foreign_keys.iter())
            .filter(|fk| !self.tables.contains_key(&fk.ref_table))
            .collect()
    }
}
