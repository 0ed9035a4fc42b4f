use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::cli::EvaluateArgs;
use crate::model::ScoredRecord;
use crate::services::{EmbeddingClient, build_embedding_client};
use crate::util::{now_utc_string, read_jsonl, utc_compact_string, write_json_pretty};

use super::scoring::{BackendReport, evaluate};

#[derive(Debug, Serialize)]
struct EvaluationRunReport {
    manifest_version: u32,
    run_id: String,
    started_at: String,
    finished_at: String,
    input_jsonl: String,
    record_count: usize,
    batch_size: usize,
    duration_ms: u128,
    backends: Vec<BackendReport>,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be greater than 0");
    }
    if args.backends.is_empty() {
        bail!("at least one --backend is required");
    }

    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("evaluate-{}", utc_compact_string(Utc::now()));

    let records: Vec<ScoredRecord> = read_jsonl(&args.input_jsonl).with_context(|| {
        format!("failed to load generation records: {}", args.input_jsonl.display())
    })?;
    info!(
        records = records.len(),
        backends = args.backends.len(),
        batch_size = args.batch_size,
        "evaluation started"
    );

    let embedders = args
        .backends
        .iter()
        .map(|backend| build_embedding_client(backend, &args.service, None))
        .collect::<Result<Vec<_>>>()?;
    let clients = embedders
        .iter()
        .map(|embedder| embedder as &dyn EmbeddingClient)
        .collect::<Vec<&dyn EmbeddingClient>>();
    let reports = evaluate(&records, &clients, args.batch_size)
        .context("similarity evaluation failed")?;

    for report in &reports {
        for tier in &report.tiers {
            info!(
                backend = %report.backend,
                tier = %tier.tier,
                count = tier.count,
                mean = ?tier.mean,
                "tier similarity"
            );
        }
    }

    write_summary(&reports)?;

    if let Some(report_path) = &args.report_path {
        let report = EvaluationRunReport {
            manifest_version: 1,
            run_id: run_id.clone(),
            started_at,
            finished_at: now_utc_string(),
            input_jsonl: display(&args.input_jsonl),
            record_count: records.len(),
            batch_size: args.batch_size,
            duration_ms: started.elapsed().as_millis(),
            backends: reports,
        };
        write_json_pretty(report_path, &report)?;
        info!(path = %report_path.display(), "evaluation report written");
    }

    info!(run_id = %run_id, "evaluation completed");
    Ok(())
}

fn write_summary(reports: &[BackendReport]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    output.write_all(render_summary(reports).as_bytes())?;
    output.flush()?;
    Ok(())
}

pub(crate) fn render_summary(reports: &[BackendReport]) -> String {
    let mut text = String::new();
    for report in reports {
        text.push_str(&format!(
            "Backend: {} (pairs={})\n",
            report.backend, report.pair_count
        ));
        for tier in &report.tiers {
            let mean = tier
                .mean
                .map(|value| format!("{value:.4}"))
                .unwrap_or_else(|| "-".to_string());
            text.push_str(&format!("\t{}\tn={}\tmean={}\n", tier.tier, tier.count, mean));
        }
    }
    text
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
