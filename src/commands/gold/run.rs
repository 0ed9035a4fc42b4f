use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::RunGoldArgs;
use crate::model::QuestionRecord;
use crate::util::{JsonlWriter, ensure_directory, read_json_records, write_json_pretty};

use super::executor::{QueryOutcome, QueryRunner};
use super::report::{ErrorSummary, GoldTally, build_record, render_log_entry};

pub(crate) const RESULTS_JSONL: &str = "results.jsonl";
pub(crate) const RESULTS_TEXT: &str = "results.txt";
pub(crate) const ERROR_SUMMARY_JSON: &str = "error_summary.json";

pub fn run(args: RunGoldArgs) -> Result<()> {
    if args.timeout_seconds == 0 {
        bail!("--timeout-seconds must be greater than 0");
    }

    let questions: Vec<QuestionRecord> = read_json_records(&args.questions_path)
        .with_context(|| format!("failed to load questions: {}", args.questions_path.display()))?;
    let runner = QueryRunner::open(&args.data_dir, !args.skip_spatial)?;
    info!(
        questions = questions.len(),
        data_dir = %args.data_dir.display(),
        timeout_seconds = args.timeout_seconds,
        "gold run started"
    );

    let summary = run_gold_queries(
        &runner,
        &questions,
        &args.output_dir,
        args.timeout_seconds,
        args.limit_output,
    )?;

    if summary.error_count == 0 {
        info!(total = summary.total_queries, "all gold queries executed successfully");
    } else {
        warn!(
            total = summary.total_queries,
            errors = summary.error_count,
            error_rate_percent = summary.error_rate_percent,
            timeouts = summary.timeout_count,
            execution_errors = summary.execution_error_count,
            "gold run finished with errors"
        );
    }
    info!(dir = %args.output_dir.display(), "gold results written");
    Ok(())
}

/// Executes every question's SQL in order and writes the three result
/// files into `output_dir`.
pub(crate) fn run_gold_queries(
    runner: &QueryRunner,
    questions: &[QuestionRecord],
    output_dir: &Path,
    timeout_seconds: u64,
    limit_output: usize,
) -> Result<ErrorSummary> {
    ensure_directory(output_dir)?;
    let mut records = JsonlWriter::create(&output_dir.join(RESULTS_JSONL))?;
    let text_path = output_dir.join(RESULTS_TEXT);
    let mut text = BufWriter::new(
        File::create(&text_path)
            .with_context(|| format!("failed to create {}", text_path.display()))?,
    );

    let deadline = Duration::from_secs(timeout_seconds);
    let mut tally = GoldTally::default();

    for question in questions {
        let sql = question.sql.as_deref().unwrap_or_default();
        let outcome = if sql.trim().is_empty() {
            QueryOutcome::ExecutionError("question has no sql".to_string())
        } else {
            runner.run_with_deadline(sql, deadline)
        };

        let record = build_record(
            &question.id,
            &question.question,
            sql,
            outcome,
            timeout_seconds,
        );
        match &record.error {
            None => info!(
                id = %record.id,
                rows = record.row_count.unwrap_or_default(),
                elapsed = record.elapsed.unwrap_or_default(),
                "gold query succeeded"
            ),
            Some(error) => warn!(
                id = %record.id,
                error_type = record.error_type.as_deref().unwrap_or_default(),
                error = %error,
                "gold query failed"
            ),
        }

        text.write_all(render_log_entry(&record, limit_output, timeout_seconds).as_bytes())?;
        records.append(&record)?;
        tally.observe(&record);
    }
    text.flush()?;

    let summary = tally.summary();
    write_json_pretty(&output_dir.join(ERROR_SUMMARY_JSON), &summary)?;
    Ok(summary)
}
