use anyhow::{Context, Result};
use duckdb::Connection;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::dataset::ParquetTable;
use crate::model::{ColumnMeta, GLOBAL_SECTION_KEY, GlobalRules, TableMeta};

use super::descriptions::DescriptionsDocument;
use super::introspect::{SourceColumn, SourceTable, inspect_table};

const KEY_COLUMNS: [&str; 4] = ["GEOID", "STATEFP", "COUNTYFP", "COUNTYFIPS"];
const GEOMETRY_COLUMN: &str = "geometry";

pub(crate) fn build_column(
    table: &str,
    column: &SourceColumn,
    descriptions: &DescriptionsDocument,
) -> ColumnMeta {
    let name = column.name.as_str();
    let (indexed, avoid_select_star) = if KEY_COLUMNS.contains(&name) {
        (true, None)
    } else if name == GEOMETRY_COLUMN {
        (true, Some(true))
    } else {
        (false, None)
    };

    ColumnMeta {
        column_name: column.name.clone(),
        declared_type: column.column_type.clone(),
        nullable: column.nullable.clone(),
        key: column.key.clone(),
        default_value: column.default_value.clone(),
        extra: column.extra.clone(),
        description: descriptions.describe(table, name),
        indexed,
        avoid_select_star,
    }
}

pub(crate) fn build_table(
    logical_name: &str,
    source: SourceTable,
    descriptions: &DescriptionsDocument,
) -> TableMeta {
    let schema = source
        .columns
        .iter()
        .map(|column| build_column(logical_name, column, descriptions))
        .collect();

    let mut table = TableMeta {
        file: source.file,
        row_count: source.row_count,
        schema,
        sample_rows: source.sample_rows,
        ..TableMeta::default()
    };
    if let Some(entry) = descriptions.table(logical_name) {
        table.layer_category = entry.layer_category.clone();
        table.key_identifier = entry.key_identifier.clone();
        table.spatial_identifier = entry.spatial_identifier.clone();
        table.meta_note = entry.meta_note.clone();
    }
    table
}

/// Introspects every Parquet table and assembles the metadata document,
/// with the global section written last.
pub(crate) fn build_metadata(
    connection: &Connection,
    tables: &[ParquetTable],
    descriptions: &DescriptionsDocument,
    sample_limit: usize,
) -> Result<Map<String, Value>> {
    let global = descriptions.global_section();
    serde_json::from_value::<GlobalRules>(global.clone())
        .context("descriptions _global section is not a valid rules document")?;

    let mut document = Map::new();
    for parquet in tables {
        if parquet.name == GLOBAL_SECTION_KEY {
            warn!(
                path = %parquet.path.display(),
                "table name collides with the global section; skipped"
            );
            continue;
        }

        let source = inspect_table(connection, parquet, sample_limit)?;
        let table = build_table(&parquet.name, source, descriptions);
        info!(
            table = %parquet.name,
            rows = table.row_count,
            columns = table.schema.len(),
            "table described"
        );

        let value = serde_json::to_value(&table)
            .with_context(|| format!("failed to serialize metadata for {}", parquet.name))?;
        document.insert(parquet.name.clone(), value);
    }

    document.insert(GLOBAL_SECTION_KEY.to_string(), global);
    Ok(document)
}
