use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use duckdb::Connection;
use duckdb::types::{TimeUnit, Value as DuckValue};
use serde_json::{Number, Value};
use tracing::{debug, info, warn};

const REGION_SUFFIXES: [&str; 2] = ["_tx_fl_la", "_TX_FL_LA"];
const PARQUET_EXTENSION: &str = "parquet";
const SECONDS_PER_DAY: i64 = 86_400;

/// A Parquet file of the benchmark dataset and the logical table name it
/// is queried under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParquetTable {
    pub name: String,
    pub path: PathBuf,
}

impl ParquetTable {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn source_expression(&self) -> String {
        format!(
            "read_parquet({})",
            string_literal(&self.path.to_string_lossy())
        )
    }
}

/// Logical table name: the file stem without its region suffix.
pub fn normalize_table_name(stem: &str) -> &str {
    REGION_SUFFIXES
        .iter()
        .find_map(|suffix| stem.strip_suffix(suffix))
        .filter(|name| !name.is_empty())
        .unwrap_or(stem)
}

/// Every `*.parquet` file directly under `data_dir`, ordered by file name.
/// A file whose logical name is already taken is skipped.
pub fn discover_parquet_tables(data_dir: &Path) -> Result<Vec<ParquetTable>> {
    let entries = fs::read_dir(data_dir)
        .with_context(|| format!("failed to read data directory: {}", data_dir.display()))?;

    let mut paths = Vec::<PathBuf>::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", data_dir.display()))?
            .path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|extension| extension == PARQUET_EXTENSION)
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut tables = Vec::<ParquetTable>::with_capacity(paths.len());
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            warn!(path = %path.display(), "non UTF-8 parquet file name; skipped");
            continue;
        };
        let name = normalize_table_name(stem).to_string();
        if let Some(existing) = tables.iter().find(|table| table.name == name) {
            warn!(
                path = %path.display(),
                kept = %existing.path.display(),
                table = %name,
                "duplicate logical table name; keeping the first"
            );
            continue;
        }
        tables.push(ParquetTable { name, path });
    }
    Ok(tables)
}

pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().context("failed to open in-memory DuckDB database")
}

/// Installs and loads the spatial extension. Returns false when it is
/// unavailable, in which case `ST_*` functions fail per query.
pub fn load_spatial(connection: &Connection) -> bool {
    match connection.execute_batch("INSTALL spatial; LOAD spatial;") {
        Ok(()) => {
            debug!("spatial extension loaded");
            true
        }
        Err(err) => {
            warn!(error = %err, "spatial extension unavailable; spatial queries will fail");
            false
        }
    }
}

/// Exposes each Parquet file as a view named after its logical table.
pub fn register_views(connection: &Connection, tables: &[ParquetTable]) -> Result<()> {
    for table in tables {
        connection
            .execute_batch(&format!(
                "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
                quote_identifier(&table.name),
                table.source_expression()
            ))
            .with_context(|| {
                format!(
                    "failed to register view {} over {}",
                    table.name,
                    table.path.display()
                )
            })?;
    }
    info!(views = tables.len(), "parquet views registered");
    Ok(())
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn string_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// JSON rendering of one result cell. BLOBs are summarised by size,
/// non-finite floats become null and temporal values are ISO 8601 text.
pub fn value_to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(flag) => Value::Bool(flag),
        DuckValue::TinyInt(number) => Value::from(number),
        DuckValue::SmallInt(number) => Value::from(number),
        DuckValue::Int(number) => Value::from(number),
        DuckValue::BigInt(number) => Value::from(number),
        DuckValue::UTinyInt(number) => Value::from(number),
        DuckValue::USmallInt(number) => Value::from(number),
        DuckValue::UInt(number) => Value::from(number),
        DuckValue::UBigInt(number) => Value::from(number),
        DuckValue::HugeInt(number) => i64::try_from(number)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(number.to_string())),
        DuckValue::Float(number) => finite_number(f64::from(number)),
        DuckValue::Double(number) => finite_number(number),
        DuckValue::Decimal(number) => number
            .to_string()
            .parse::<f64>()
            .map(finite_number)
            .unwrap_or(Value::Null),
        DuckValue::Text(text) | DuckValue::Enum(text) => Value::String(text),
        DuckValue::Blob(bytes) => Value::String(format!("BLOB({} bytes)", bytes.len())),
        DuckValue::Timestamp(unit, raw) => {
            DateTime::from_timestamp_micros(micros_from(unit, raw))
                .map(|stamp| {
                    Value::String(
                        stamp
                            .naive_utc()
                            .format("%Y-%m-%dT%H:%M:%S%.f")
                            .to_string(),
                    )
                })
                .unwrap_or(Value::Null)
        }
        DuckValue::Date32(days) => {
            DateTime::from_timestamp(i64::from(days) * SECONDS_PER_DAY, 0)
                .map(|stamp| Value::String(stamp.date_naive().to_string()))
                .unwrap_or(Value::Null)
        }
        DuckValue::List(items) | DuckValue::Array(items) => {
            Value::Array(items.into_iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn finite_number(number: f64) -> Value {
    Number::from_f64(number)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn micros_from(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

/// Writes `table` from `connection` to a Parquet file at `path`.
#[cfg(test)]
pub fn export_parquet(connection: &Connection, table: &str, path: &Path) {
    connection
        .execute_batch(&format!(
            "COPY {} TO {} (FORMAT PARQUET)",
            quote_identifier(table),
            string_literal(&path.to_string_lossy())
        ))
        .expect("parquet export");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::util::scratch_dir;

    #[test]
    fn region_suffix_is_stripped_in_either_case() {
        assert_eq!(normalize_table_name("claims_tx_fl_la"), "claims");
        assert_eq!(normalize_table_name("county_TX_FL_LA"), "county");
        assert_eq!(normalize_table_name("zcta"), "zcta");
        assert_eq!(normalize_table_name("_tx_fl_la"), "_tx_fl_la");
    }

    #[test]
    fn discovery_orders_parquet_files_and_skips_duplicates() {
        let dir = scratch_dir("discover");
        let connection = open_in_memory().expect("duckdb");
        connection
            .execute_batch("CREATE TABLE one AS SELECT 1 AS id;")
            .expect("fixture");
        for file in [
            "county_tx_fl_la.parquet",
            "county.parquet",
            "claims_TX_FL_LA.parquet",
        ] {
            export_parquet(&connection, "one", &dir.join(file));
        }
        fs::write(dir.join("notes.txt"), "not a table").expect("notes");

        let tables = discover_parquet_tables(&dir).expect("discover");
        let found = tables
            .iter()
            .map(|table| (table.name.as_str(), table.file_name()))
            .collect::<Vec<(&str, String)>>();
        assert_eq!(
            found,
            vec![
                ("claims", "claims_TX_FL_LA.parquet".to_string()),
                ("county", "county.parquet".to_string()),
            ]
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn views_expose_parquet_files_under_logical_names() {
        let dir = scratch_dir("views");
        let writer = open_in_memory().expect("duckdb");
        writer
            .execute_batch(
                "CREATE TABLE county (GEOID VARCHAR, NAME VARCHAR);
                 INSERT INTO county VALUES ('48201', 'Harris'), ('22071', 'Orleans');",
            )
            .expect("fixture");
        export_parquet(&writer, "county", &dir.join("county_tx_fl_la.parquet"));

        let connection = open_in_memory().expect("duckdb");
        let tables = discover_parquet_tables(&dir).expect("discover");
        register_views(&connection, &tables).expect("views");

        let count = connection
            .query_row(
                "SELECT COUNT(*) FROM county WHERE LEFT(GEOID, 2) = '48'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .expect("count");
        assert_eq!(count, 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn cells_render_as_json() {
        let connection = open_in_memory().expect("duckdb");
        let mut statement = connection
            .prepare(
                r"SELECT TRUE, 42::TINYINT, 1.5::DOUBLE, 'nan'::DOUBLE, 'x',
                         '\xAA\xBB'::BLOB, DATE '2024-05-01',
                         TIMESTAMP '2024-05-01 12:30:00', [1, 2],
                         12.50::DECIMAL(4, 2), NULL",
            )
            .expect("prepare");
        let mut rows = statement.query([]).expect("query");
        let row = rows.next().expect("step").expect("one row");

        let cells = (0..11)
            .map(|index| value_to_json(row.get::<_, DuckValue>(index).expect("cell")))
            .collect::<Vec<Value>>();
        assert_eq!(
            cells,
            vec![
                json!(true),
                json!(42),
                json!(1.5),
                Value::Null,
                json!("x"),
                json!("BLOB(2 bytes)"),
                json!("2024-05-01"),
                json!("2024-05-01T12:30:00"),
                json!([1, 2]),
                json!(12.5),
                Value::Null,
            ]
        );
    }

    #[test]
    fn literals_and_identifiers_are_escaped() {
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(string_literal("it's.parquet"), "'it''s.parquet'");
    }
}
