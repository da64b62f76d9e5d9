// src/core/export.rs

//! Semicolon-separated dump of the compliance table: a header with the column names,
//! then one line per host. Empty cells are written as `None`, which is what the
//! spreadsheets fed from this table have always received.

use crate::core::models::{CheckField, HostRecord};
use crate::core::store::{ResultStore, StoreError, columns};
use std::io::Write;
use strum::IntoEnumIterator;
use tracing::info;

const SEPARATOR: &str = ";";
const EMPTY_CELL: &str = "None";

fn cell(value: Option<String>) -> String {
    value.unwrap_or_else(|| EMPTY_CELL.to_string())
}

/// One line in [`columns`] order.
pub fn render_row(record: &HostRecord) -> String {
    let mut cells = vec![record.host.clone(), cell(record.check_date.clone())];
    cells.extend(CheckField::iter().map(|field| cell(record.verdict(field).as_db().map(|v| v.to_string()))));
    cells.push(cell(record.grade.clone()));
    cells.join(SEPARATOR)
}

pub fn write_table<W: Write>(records: &[HostRecord], out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{}", columns().join(SEPARATOR))?;
    for record in records {
        writeln!(out, "{}", render_row(record))?;
    }
    out.flush()
}

/// Writes every row of `store`, ordered by host. Returns the number of rows.
pub async fn export_table<W: Write>(store: &ResultStore, out: &mut W) -> Result<usize, StoreError> {
    let records = store.records().await?;
    info!(
        path = %store.path().display(),
        version = store.schema_version()?,
        rows = records.len(),
        "Exporting compliance table."
    );
    write_table(&records, out)?;
    Ok(records.len())
}
