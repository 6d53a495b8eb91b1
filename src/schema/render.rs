use crate::schema::model::{SchemaSnapshot, Table};
use serde_json::Value;

/// Sample rows shown per table in prompts.
pub const PROMPT_SAMPLE_ROWS: usize = 2;

/// Renders a snapshot as markdown for LLM context.
///
/// Output is deterministic: tables sorted by name, columns in ordinal order,
/// foreign keys as `column → ref_table.ref_column` lines.
pub fn render_schema_markdown(snapshot: &SchemaSnapshot, include_samples: bool) -> String {
    let mut out = format!("## Schema: {}\n\n", snapshot.schema_name);

    for table in snapshot.tables.values() {
        out.push_str(&render_table(table, include_samples, PROMPT_SAMPLE_ROWS));
        out.push('\n');
    }

    out
}

fn render_table(table: &Table, include_samples: bool, preview_rows: usize) -> String {
    let mut lines = vec![format!("### {}", table.name), "**Columns**".to_string()];

    for col in &table.columns {
        let mut marks = Vec::new();
        if table.is_primary_key(&col.name) {
            marks.push("PK");
        }
        if table.is_foreign_key(&col.name) {
            marks.push("FK");
        }
        let suffix = if marks.is_empty() {
            String::new()
        } else {
            format!(" ({})", marks.join(","))
        };
        let not_null = if col.nullable { "" } else { " NOT NULL" };
        lines.push(format!("- {}: {}{}{}", col.name, col.data_type, not_null, suffix));
    }

    if !table.foreign_keys.is_empty() {
        lines.push("**Foreign Keys**".to_string());
        for fk in &table.foreign_keys {
            lines.push(format!("- {} → {}.{}", fk.column, fk.ref_table, fk.ref_column));
        }
    }

    if include_samples && !table.sample_rows.is_empty() {
        let shown = preview_rows.min(table.sample_rows.len());
        lines.push(format!("**Samples (up to {})**", shown));

        let headers: Vec<&String> = table.sample_rows[0].keys().collect();
        lines.push(
            headers
                .iter()
                .map(|h| h.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );

        for row in table.sample_rows.iter().take(shown) {
            let values: Vec<String> = headers
                .iter()
                .map(|h| row.get(h.as_str()).map(sample_value).unwrap_or_default())
                .collect();
            lines.push(values.join(", "));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

fn sample_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
