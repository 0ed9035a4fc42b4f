use serde::Serialize;
use serde_json::Value;

use super::executor::{QueryOutcome, ResultRow};

pub(crate) const TIMEOUT_ERROR_TYPE: &str = "timeout";
pub(crate) const EXECUTION_ERROR_TYPE: &str = "execution_error";

const RULE_WIDTH: usize = 80;

/// One line of `results.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct GoldRecord {
    pub(crate) id: String,
    pub(crate) question: String,
    pub(crate) sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) elapsed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<Vec<ResultRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ErrorDetail {
    pub(crate) id: String,
    pub(crate) question: String,
    pub(crate) error: String,
    pub(crate) error_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ErrorSummary {
    pub(crate) total_queries: usize,
    pub(crate) error_count: usize,
    pub(crate) error_rate_percent: f64,
    pub(crate) timeout_count: usize,
    pub(crate) execution_error_count: usize,
    pub(crate) error_ids: Vec<String>,
    pub(crate) timeout_ids: Vec<String>,
    pub(crate) errors: Vec<ErrorDetail>,
}

/// Running totals across a gold run, fed one outcome at a time.
#[derive(Debug, Default)]
pub(crate) struct GoldTally {
    total: usize,
    error_ids: Vec<String>,
    timeout_ids: Vec<String>,
    errors: Vec<ErrorDetail>,
}

impl GoldTally {
    pub(crate) fn observe(&mut self, record: &GoldRecord) {
        self.total += 1;
        let (Some(error), Some(error_type)) = (&record.error, &record.error_type) else {
            return;
        };

        self.error_ids.push(record.id.clone());
        if error_type == TIMEOUT_ERROR_TYPE {
            self.timeout_ids.push(record.id.clone());
        }
        self.errors.push(ErrorDetail {
            id: record.id.clone(),
            question: record.question.clone(),
            error: error.clone(),
            error_type: error_type.clone(),
        });
    }

    pub(crate) fn summary(self) -> ErrorSummary {
        let error_count = self.error_ids.len();
        let error_rate_percent = if self.total == 0 {
            0.0
        } else {
            round_to(error_count as f64 / self.total as f64 * 100.0, 2)
        };
        ErrorSummary {
            total_queries: self.total,
            error_count,
            error_rate_percent,
            timeout_count: self.timeout_ids.len(),
            execution_error_count: error_count - self.timeout_ids.len(),
            error_ids: self.error_ids,
            timeout_ids: self.timeout_ids,
            errors: self.errors,
        }
    }
}

pub(crate) fn build_record(
    id: &str,
    question: &str,
    sql: &str,
    outcome: QueryOutcome,
    timeout_seconds: u64,
) -> GoldRecord {
    let mut record = GoldRecord {
        id: id.to_string(),
        question: question.to_string(),
        sql: sql.to_string(),
        elapsed: None,
        row_count: None,
        result: None,
        error: None,
        error_type: None,
    };

    match outcome {
        QueryOutcome::Success { rows, elapsed } => {
            record.elapsed = Some(round_to(elapsed.as_secs_f64(), 3));
            record.row_count = Some(rows.len());
            record.result = Some(rows);
        }
        QueryOutcome::Timeout => {
            record.error = Some(format!("Timeout: exceeded {timeout_seconds}s"));
            record.error_type = Some(TIMEOUT_ERROR_TYPE.to_string());
        }
        QueryOutcome::ExecutionError(message) => {
            record.error = Some(message);
            record.error_type = Some(EXECUTION_ERROR_TYPE.to_string());
        }
    }

    record
}

/// The `results.txt` block for one question.
pub(crate) fn render_log_entry(
    record: &GoldRecord,
    limit_output: usize,
    timeout_seconds: u64,
) -> String {
    let mut text = String::new();
    text.push_str(&"=".repeat(RULE_WIDTH));
    text.push('\n');
    text.push_str(&format!("[{}] {}\n", record.id, record.question));
    text.push_str(&"-".repeat(RULE_WIDTH));
    text.push('\n');
    text.push_str(&record.sql);
    text.push_str("\n\n");

    match (&record.result, record.error_type.as_deref()) {
        (Some(rows), _) => {
            text.push_str(&format!(
                "Success ({} rows, {:.3} sec)\n",
                rows.len(),
                record.elapsed.unwrap_or_default()
            ));
            text.push_str(&format_result(rows, limit_output));
        }
        (None, Some(TIMEOUT_ERROR_TYPE)) => {
            text.push_str(&format!(
                "Timeout Error: Query exceeded {timeout_seconds} seconds\n"
            ));
        }
        (None, _) => {
            text.push_str(&format!(
                "Error while executing: {}\n",
                record.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    text
}

/// Pretty-prints a result set: a lone scalar on its own line, otherwise the
/// first `limit` rows as a padded `|`-separated table.
pub(crate) fn format_result(rows: &[ResultRow], limit: usize) -> String {
    let Some(first) = rows.first() else {
        return "  (no rows)\n".to_string();
    };
    if rows.len() == 1 && first.len() == 1 {
        return format!("  {}\n", cell_text(&first[0]));
    }

    let shown = &rows[..rows.len().min(limit)];
    let widths = (0..first.len())
        .map(|column| {
            shown
                .iter()
                .map(|row| row.get(column).map(cell_text).unwrap_or_default().chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect::<Vec<usize>>();

    let mut lines = shown
        .iter()
        .map(|row| {
            let cells = widths
                .iter()
                .enumerate()
                .map(|(column, width)| {
                    let text = row.get(column).map(cell_text).unwrap_or_default();
                    format!("{text:<width$}")
                })
                .collect::<Vec<String>>();
            format!("  {}", cells.join(" | "))
        })
        .collect::<Vec<String>>();
    if rows.len() > limit {
        lines.push(format!("  ... ({} more rows)", rows.len() - limit));
    }

    lines.join("\n") + "\n"
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
