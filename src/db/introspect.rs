use crate::db::rows::query_rows;
use crate::db::DbError;
use crate::schema::model::{Column, ForeignKey, Row, SchemaSnapshot, Table, MAX_SAMPLE_ROWS};
use duckdb::types::ToSql;
use duckdb::Connection;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

const COLUMNS_SQL: &str = "
    SELECT c.table_name, c.column_name, c.is_nullable, c.data_type, c.column_default
    FROM information_schema.columns c
    WHERE c.table_catalog = current_database() AND c.table_schema = ?
    ORDER BY c.table_name, c.ordinal_position
";

const PRIMARY_KEYS_SQL: &str = "
    SELECT table_name, unnest(constraint_column_names) AS column_name
    FROM duckdb_constraints()
    WHERE database_name = current_database()
      AND schema_name = ?
      AND constraint_type = 'PRIMARY KEY'
";

const FOREIGN_KEYS_SQL: &str = "
    SELECT table_name, constraint_text
    FROM duckdb_constraints()
    WHERE database_name = current_database()
      AND schema_name = ?
      AND constraint_type = 'FOREIGN KEY'
";

static FOREIGN_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)FOREIGN\s+KEY\s*\(([^)]*)\)\s*REFERENCES\s+([^\s(]+)\s*\(([^)]*)\)"#)
        .expect("foreign key pattern is valid")
});

/// Reads columns, keys and sample rows for every table in `schema`.
pub fn load_schema_snapshot(conn: &Connection, schema: &str) -> Result<SchemaSnapshot, DbError> {
    let mut snapshot = SchemaSnapshot::new(schema);

    for r in fetch(conn, COLUMNS_SQL, schema)? {
        let table_name = text(&r, "table_name");
        let table = snapshot
            .tables
            .entry(table_name.clone())
            .or_insert_with(|| Table::new(table_name));
        table.columns.push(Column {
            name: text(&r, "column_name"),
            data_type: text(&r, "data_type"),
            nullable: text(&r, "is_nullable").eq_ignore_ascii_case("YES"),
            default: r
                .get("column_default")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    for r in fetch(conn, PRIMARY_KEYS_SQL, schema)? {
        if let Some(table) = snapshot.tables.get_mut(&text(&r, "table_name")) {
            table.primary_key.push(text(&r, "column_name"));
        }
    }

    for r in fetch(conn, FOREIGN_KEYS_SQL, schema)? {
        let table_name = text(&r, "table_name");
        let Some(table) = snapshot.tables.get_mut(&table_name) else {
            continue;
        };
        for fk in parse_foreign_keys(&table_name, &text(&r, "constraint_text")) {
            // Constraints can also be listed on the referenced side; keep only
            // edges whose column actually lives in this table.
            let owns_column = table.columns.iter().any(|c| c.name == fk.column);
            if owns_column && !table.foreign_keys.contains(&fk) {
                table.foreign_keys.push(fk);
            }
        }
    }

    for table in snapshot.tables.values_mut() {
        let sql = format!(
            "SELECT * FROM {}.{} LIMIT {}",
            quote_ident(schema),
            quote_ident(&table.name),
            MAX_SAMPLE_ROWS
        );
        let mut stmt = conn.prepare(&sql)?;
        table.sample_rows = query_rows(&mut stmt, &[])?;
    }

    debug!(
        "Loaded snapshot of schema '{}' with {} tables",
        schema,
        snapshot.tables.len()
    );
    Ok(snapshot)
}

fn fetch(conn: &Connection, sql: &str, schema: &str) -> Result<Vec<Row>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    query_rows(&mut stmt, &[&schema as &dyn ToSql])
}

fn text(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Parses `FOREIGN KEY (a, b) REFERENCES other(x, y)` into one edge per column pair.
pub fn parse_foreign_keys(table: &str, constraint_text: &str) -> Vec<ForeignKey> {
    let Some(caps) = FOREIGN_KEY_RE.captures(constraint_text) else {
        return Vec::new();
    };

    let columns = split_idents(&caps[1]);
    let ref_table = unquote(caps[2].rsplit('.').next().unwrap_or(&caps[2]));
    let ref_columns = split_idents(&caps[3]);

    columns
        .into_iter()
        .zip(ref_columns)
        .map(|(column, ref_column)| ForeignKey {
            table: table.to_string(),
            column,
            ref_table: ref_table.clone(),
            ref_column,
        })
        .collect()
}

fn split_idents(list: &str) -> Vec<String> {
    list.split(',')
        .map(unquote)
        .filter(|s| !s.is_empty())
        .collect()
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches('"').replace("\"\"", "\"")
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
