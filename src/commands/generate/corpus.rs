use crate::model::{ColumnMeta, MetadataDocument};

/// Table-level retrieval document: the table name followed by one
/// `column: description` line per column.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableDocument {
    pub(crate) table: String,
    pub(crate) text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnDocument {
    pub(crate) column: String,
    pub(crate) text: String,
}

/// Column documents grouped by table, both in metadata order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ColumnIndex {
    pub(crate) tables: Vec<(String, Vec<ColumnDocument>)>,
}

impl ColumnIndex {
    pub(crate) fn columns(&self, table: &str) -> &[ColumnDocument] {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, columns)| columns.as_slice())
            .unwrap_or(&[])
    }
}

fn column_text(column: &ColumnMeta) -> String {
    format!("{}: {}", column.column_name, column.description)
}

pub(crate) fn build_table_index(meta: &MetadataDocument) -> Vec<TableDocument> {
    meta.tables
        .iter()
        .map(|(table, info)| {
            let mut parts = Vec::<String>::with_capacity(info.schema.len() + 1);
            parts.push(table.clone());
            parts.extend(info.schema.iter().map(column_text));
            TableDocument {
                table: table.clone(),
                text: parts.join("\n"),
            }
        })
        .collect()
}

pub(crate) fn build_column_index(meta: &MetadataDocument) -> ColumnIndex {
    let tables = meta
        .tables
        .iter()
        .map(|(table, info)| {
            let columns = info
                .schema
                .iter()
                .map(|column| ColumnDocument {
                    column: column.column_name.clone(),
                    text: column_text(column),
                })
                .collect::<Vec<ColumnDocument>>();
            (table.clone(), columns)
        })
        .collect();

    ColumnIndex { tables }
}
