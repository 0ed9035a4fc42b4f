use anyhow::{Context, Result};
use duckdb::Connection;
use duckdb::types::Value as DuckValue;
use serde_json::{Map, Value};

use crate::dataset::{ParquetTable, value_to_json};

/// One row of `DESCRIBE` output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceColumn {
    pub(crate) name: String,
    pub(crate) column_type: String,
    pub(crate) nullable: Option<String>,
    pub(crate) key: Option<String>,
    pub(crate) default_value: Option<String>,
    pub(crate) extra: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SourceTable {
    pub(crate) file: String,
    pub(crate) columns: Vec<SourceColumn>,
    pub(crate) row_count: i64,
    pub(crate) sample_rows: Vec<Map<String, Value>>,
}

pub(crate) fn inspect_table(
    connection: &Connection,
    table: &ParquetTable,
    sample_limit: usize,
) -> Result<SourceTable> {
    let source = table.source_expression();
    let columns = describe_columns(connection, &source)
        .with_context(|| format!("failed to describe {}", table.path.display()))?;

    let row_count = connection
        .query_row(&format!("SELECT COUNT(*) FROM {source}"), [], |row| {
            row.get::<_, i64>(0)
        })
        .with_context(|| format!("failed to count rows of {}", table.path.display()))?;

    let sample_rows = sample_rows(connection, &source, &columns, sample_limit)
        .with_context(|| format!("failed to sample rows of {}", table.path.display()))?;

    Ok(SourceTable {
        file: table.file_name(),
        columns,
        row_count,
        sample_rows,
    })
}

fn describe_columns(connection: &Connection, source: &str) -> duckdb::Result<Vec<SourceColumn>> {
    let mut statement = connection.prepare(&format!("DESCRIBE SELECT * FROM {source}"))?;
    statement
        .query_map([], |row| {
            Ok(SourceColumn {
                name: row.get(0)?,
                column_type: row.get(1)?,
                nullable: row.get(2)?,
                key: row.get(3)?,
                default_value: row.get(4)?,
                extra: row.get(5)?,
            })
        })?
        .collect::<duckdb::Result<Vec<SourceColumn>>>()
}

fn sample_rows(
    connection: &Connection,
    source: &str,
    columns: &[SourceColumn],
    limit: usize,
) -> duckdb::Result<Vec<Map<String, Value>>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut statement =
        connection.prepare(&format!("SELECT * FROM {source} USING SAMPLE {limit} ROWS"))?;
    let mut rows = statement.query([])?;
    let mut out = Vec::<Map<String, Value>>::new();
    while let Some(row) = rows.next()? {
        let mut sample = Map::new();
        for (index, column) in columns.iter().enumerate() {
            sample.insert(
                column.name.clone(),
                value_to_json(row.get::<_, DuckValue>(index)?),
            );
        }
        out.push(sample);
    }
    Ok(out)
}
