//! Coerces a raw extracted table against its inferred schema and persists
//! it through the relational substrate inside one transaction per table.

use super::extractor::RawTable;
use super::schema::{coerce_cell, CellValue, TableSchema};
use crate::error::Result;
use crate::relational::RelationalStore;
use tracing::debug;

/// Coerce and persist one logical table. The header row (row 0) is never
/// written as data.
pub async fn write_table(
    store: &RelationalStore,
    schema: &TableSchema,
    raw: &RawTable,
) -> Result<usize> {
    store.create_table(schema).await?;

    let data_rows = raw.rows.iter().skip(1);

    // Zip the schema's columns positionally against each raw row's cells —
    // both are in the raw table's original header order, so column i's
    // semantic type always coerces cell i, never a name-matched cell from a
    // differently ordered column list.
    let coerced_rows: Vec<Vec<CellValue>> = data_rows
        .map(|row| {
            schema
                .columns
                .iter()
                .enumerate()
                .map(|(i, (_, semantic_type))| {
                    let raw_cell = row.get(i).map(|s| s.as_str()).unwrap_or("");
                    coerce_cell(raw_cell, *semantic_type)
                })
                .collect()
        })
        .collect();

    store.insert_rows(schema, &coerced_rows).await?;

    debug!(table = %schema.table_name, rows = coerced_rows.len(), "wrote table");
    Ok(coerced_rows.len())
}
