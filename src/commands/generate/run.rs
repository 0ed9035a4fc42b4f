use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::cli::{GenerateArgs, RetrievalErrorPolicy};
use crate::model::{MetadataDocument, QuestionRecord};
use crate::services::{
    CompletionClient, EmbeddingClient, build_completion_client, build_embedding_client,
};
use crate::util::{JsonlWriter, now_utc_string, read_jsonl, utc_compact_string, write_json_pretty};

use super::pipeline::{Generator, RunContext};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct GenerationCounts {
    pub(crate) questions: usize,
    pub(crate) generated: usize,
    pub(crate) null_sql: usize,
}

#[derive(Debug, Serialize)]
struct GenerationRunManifest {
    manifest_version: u32,
    run_id: String,
    started_at: String,
    finished_at: String,
    metadata_path: String,
    questions_path: String,
    output_jsonl: String,
    completion_model: String,
    embedding_model: String,
    table_count: usize,
    question_count: usize,
    generated_count: usize,
    null_sql_count: usize,
    duration_ms: u128,
    status: String,
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("generate-{}", utc_compact_string(Utc::now()));

    let metadata = MetadataDocument::load(&args.metadata_path)?;
    let context = RunContext::new(metadata);
    info!(
        tables = context.table_index.len(),
        path = %args.metadata_path.display(),
        "metadata loaded"
    );

    let questions: Vec<QuestionRecord> = read_jsonl(&args.questions_path)
        .with_context(|| format!("failed to load questions: {}", args.questions_path.display()))?;

    let embedder = build_embedding_client(
        &args.embedding_model,
        &args.service,
        args.embedding_cache_path.as_deref(),
    )?;
    let completer = build_completion_client(&args.model_name, &args.service)?;

    let mut writer = JsonlWriter::create(&args.output_jsonl)?;
    let counts = generate_batch(
        &context,
        &embedder,
        &completer,
        args.on_retrieval_error,
        &questions,
        &mut writer,
    )?;

    info!(
        run_id = %run_id,
        path = %writer.path().display(),
        questions = counts.questions,
        generated = counts.generated,
        null_sql = counts.null_sql,
        "generation completed"
    );

    if let Some(manifest_path) = &args.manifest_path {
        let manifest = GenerationRunManifest {
            manifest_version: 1,
            run_id,
            started_at,
            finished_at: now_utc_string(),
            metadata_path: display(&args.metadata_path),
            questions_path: display(&args.questions_path),
            output_jsonl: display(&args.output_jsonl),
            completion_model: completer.model_id().to_string(),
            embedding_model: embedder.model_id().to_string(),
            table_count: context.table_index.len(),
            question_count: counts.questions,
            generated_count: counts.generated,
            null_sql_count: counts.null_sql,
            duration_ms: started.elapsed().as_millis(),
            status: "completed".to_string(),
        };
        write_json_pretty(manifest_path, &manifest)?;
    }

    Ok(())
}

/// Processes questions in input order, appending each record as soon as it
/// is produced.
pub(crate) fn generate_batch(
    context: &RunContext,
    embedder: &dyn EmbeddingClient,
    completer: &dyn CompletionClient,
    on_retrieval_error: RetrievalErrorPolicy,
    questions: &[QuestionRecord],
    writer: &mut JsonlWriter,
) -> Result<GenerationCounts> {
    let generator = Generator::new(context, embedder, completer, on_retrieval_error);
    let mut counts = GenerationCounts::default();

    for question in questions {
        let record = generator.generate(question)?;
        counts.questions += 1;
        if record.generated_sql.is_some() {
            counts.generated += 1;
        } else {
            counts.null_sql += 1;
        }
        writer.append(&record)?;
    }

    Ok(counts)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
