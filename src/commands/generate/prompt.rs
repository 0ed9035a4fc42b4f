use serde_json::Value;
use tracing::warn;

use crate::model::{JoinEntry, MetadataDocument};

use super::retrieval::ColumnSelection;

pub(crate) const MAX_PROMPT_CHARS: usize = 80_000;
pub(crate) const TRUNCATION_MARKER: &str = "...[TRUNCATED]...";

/// Renders the schema context block handed to the model. Join rules, rules,
/// and notes always come from the whole global section, independent of what
/// retrieval selected.
pub(crate) fn build_prompt(
    meta: &MetadataDocument,
    chosen_tables: &[String],
    chosen_columns: &[ColumnSelection],
) -> String {
    let mut lines = Vec::<String>::new();

    lines.push("[TABLES SELECTED]".to_string());
    for table in chosen_tables {
        lines.push(format!("- {table}"));
    }

    lines.push("\n[COLUMNS SELECTED]".to_string());
    for selection in chosen_columns {
        for column in &selection.columns {
            lines.push(format!(
                "- {}.{}: {}",
                selection.table, column.column, column.text
            ));
        }
    }

    let joins = &meta.global.join_rules;
    push_join_section(&mut lines, "KEY-BASED DIRECT", &joins.key_based.direct);
    push_join_section(&mut lines, "KEY-BASED CONCAT", &joins.key_based.concat);
    push_join_section(&mut lines, "SPATIAL POINT-POLYGON", &joins.spatial.point_polygon);
    push_join_section(
        &mut lines,
        "SPATIAL POLYGON-POLYGON",
        &joins.spatial.polygon_polygon,
    );

    lines.push("\n[RULES]".to_string());
    for (key, value) in &meta.global.rules {
        lines.push(format!("- {key}: {}", render_rule_value(value)));
    }

    lines.push("\n[NOTES]".to_string());
    for note in &meta.global.notes {
        lines.push(format!("- {note}"));
    }

    lines.push("\n[SPATIAL-NOTES]".to_string());
    for note in &meta.global.spatial_function_notes {
        lines.push(format!("- {note}"));
    }

    truncate_prompt(lines.join("\n"), MAX_PROMPT_CHARS)
}

fn push_join_section(lines: &mut Vec<String>, title: &str, entries: &[JoinEntry]) {
    lines.push(format!("\n[JOIN RULES: {title}]"));
    for (left, right) in entries.iter().filter_map(JoinEntry::endpoints) {
        lines.push(format!("- {left}  <->  {right}"));
    }
}

fn render_rule_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Keeps the first `max_chars` characters and appends the marker. Counting
/// is by `char`, so multi-byte text is never split mid-codepoint.
pub(crate) fn truncate_prompt(prompt: String, max_chars: usize) -> String {
    let Some((cut, _)) = prompt.char_indices().nth(max_chars) else {
        return prompt;
    };

    warn!(
        max_chars,
        prompt_bytes = prompt.len(),
        "metadata prompt truncated"
    );
    let mut truncated = prompt;
    truncated.truncate(cut);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
