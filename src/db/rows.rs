use crate::db::DbError;
use crate::schema::Row;
use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use arrow::record_batch::RecordBatch;
use duckdb::types::ToSql;
use duckdb::Statement;

/// Executes a prepared statement and decodes its Arrow batches into rows.
pub fn query_rows(stmt: &mut Statement<'_>, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
    let batches: Vec<RecordBatch> = stmt.query_arrow(params)?.collect();
    batches_to_rows(&batches)
}

/// Converts record batches to JSON rows, keeping column order and nulls.
pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Row>, DbError> {
    let row_count: usize = batches.iter().map(|b| b.num_rows()).sum();
    if row_count == 0 {
        return Ok(Vec::new());
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());

    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer
        .write_batches(&refs)
        .map_err(|e| DbError::Decode(e.to_string()))?;
    writer.finish().map_err(|e| DbError::Decode(e.to_string()))?;

    let buffer = writer.into_inner();
    serde_json::from_slice(&buffer).map_err(|e| DbError::Decode(e.to_string()))
}
