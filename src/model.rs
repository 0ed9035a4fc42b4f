use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub const GLOBAL_SECTION_KEY: &str = "_global";

/// Schema document consumed by the retrieval and prompt stages. Table order
/// follows the source document and is kept stable for ranking ties.
#[derive(Debug, Clone, Default)]
pub struct MetadataDocument {
    pub tables: Vec<(String, TableMeta)>,
    pub global: GlobalRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMeta {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub schema: Vec<ColumnMeta>,
    #[serde(default)]
    pub sample_rows: Vec<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_identifier: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_identifier: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_category: Option<String>,
    #[serde(
        rename = "_meta",
        alias = "meta_note",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub meta_note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub column_name: String,
    #[serde(rename = "column_type", alias = "declared_type", default)]
    pub declared_type: String,
    #[serde(rename = "null", default)]
    pub nullable: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "default", default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub extra: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avoid_select_star: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalRules {
    pub join_rules: JoinRules,
    pub rules: Map<String, Value>,
    pub notes: Vec<String>,
    pub spatial_function_notes: Vec<String>,
    pub basic_function_notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRules {
    pub key_based: KeyBasedJoins,
    pub spatial: SpatialJoins,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBasedJoins {
    pub direct: Vec<JoinEntry>,
    pub concat: Vec<JoinEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialJoins {
    pub point_polygon: Vec<JoinEntry>,
    pub polygon_polygon: Vec<JoinEntry>,
}

/// A join declaration, written either as `{"pair": [left, right]}` or as a
/// bare two-element array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinEntry {
    Tagged { pair: Vec<String> },
    Bare(Vec<String>),
}

impl JoinEntry {
    pub fn endpoints(&self) -> Option<(&str, &str)> {
        let pair = match self {
            Self::Tagged { pair } => pair,
            Self::Bare(pair) => pair,
        };
        match pair.as_slice() {
            [left, right] => Some((left.as_str(), right.as_str())),
            _ => None,
        }
    }
}

impl MetadataDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("failed to read metadata: {}", path.display()))?;
        let value: Value = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse metadata: {}", path.display()))?;
        Self::from_value(value)
            .with_context(|| format!("invalid metadata document: {}", path.display()))
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(entries) = value else {
            bail!("metadata document must be a JSON object");
        };

        let mut document = Self::default();
        for (name, entry) in entries {
            if name == GLOBAL_SECTION_KEY {
                document.global = serde_json::from_value(entry)
                    .context("failed to parse _global section")?;
                continue;
            }

            let table: TableMeta = serde_json::from_value(entry)
                .with_context(|| format!("failed to parse table entry '{name}'"))?;
            document.tables.push((name, table));
        }

        Ok(document)
    }

    #[cfg(test)]
    pub fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables
            .iter()
            .find(|(table_name, _)| table_name == name)
            .map(|(_, table)| table)
    }
}

/// One benchmark question as stored in the question batch files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub sql: Option<String>,
}

impl QuestionRecord {
    pub fn tier(&self) -> &str {
        tier_of(&self.id)
    }
}

/// Difficulty tier encoded as the first `_`-delimited token of an id.
pub fn tier_of(id: &str) -> &str {
    id.split_once('_').map(|(tier, _)| tier).unwrap_or(id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScore {
    pub table: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRecord {
    pub id: String,
    pub question: String,
    pub gt_sql: Option<String>,
    pub generated_sql: Option<String>,
    pub chosen_tables: Vec<String>,
    #[serde(serialize_with = "serialize_ordered_map")]
    pub chosen_columns: Vec<(String, Vec<String>)>,
    pub table_scores: Vec<TableScore>,
}

/// The subset of a generation record the evaluator reads back.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredRecord {
    pub id: String,
    #[serde(default)]
    pub gt_sql: Option<String>,
    #[serde(default)]
    pub generated_sql: Option<String>,
}

fn serialize_ordered_map<S>(
    value: &[(String, Vec<String>)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(value.iter().map(|(key, columns)| (key, columns)))
}
