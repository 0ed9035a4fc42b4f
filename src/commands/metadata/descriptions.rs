use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

pub(crate) const UNKNOWN_DESCRIPTION: &str = "unknown";

/// Hand-written field descriptions merged into the introspected schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DescriptionsDocument {
    #[serde(default)]
    pub(crate) tables: HashMap<String, TableDescription>,
    #[serde(default)]
    pub(crate) common: HashMap<String, String>,
    #[serde(default, rename = "_global")]
    pub(crate) global: Option<Value>,
}

/// Table-level notes plus column descriptions, given either under
/// `columns` or inline next to the table-level keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TableDescription {
    #[serde(default)]
    pub(crate) layer_category: Option<String>,
    #[serde(default)]
    pub(crate) key_identifier: Option<Vec<String>>,
    #[serde(default)]
    pub(crate) spatial_identifier: Option<Vec<String>>,
    #[serde(default, rename = "_meta")]
    pub(crate) meta_note: Option<String>,
    #[serde(default)]
    pub(crate) columns: HashMap<String, String>,
    #[serde(flatten)]
    pub(crate) inline: Map<String, Value>,
}

impl TableDescription {
    fn column(&self, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .map(String::as_str)
            .or_else(|| self.inline.get(column).and_then(Value::as_str))
    }
}

impl DescriptionsDocument {
    pub(crate) fn table(&self, table: &str) -> Option<&TableDescription> {
        self.tables.get(table)
    }

    /// Table-specific description, then the shared `common` entry, then
    /// `"unknown"`. A `geom` column is described as `geometry`.
    pub(crate) fn describe(&self, table: &str, column: &str) -> String {
        let column = if column == "geom" { "geometry" } else { column };
        self.table(table)
            .and_then(|entry| entry.column(column))
            .or_else(|| self.common.get(column).map(String::as_str))
            .unwrap_or(UNKNOWN_DESCRIPTION)
            .to_string()
    }

    pub(crate) fn global_section(&self) -> Value {
        self.global
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}
