use std::fmt;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::cli::RetrievalErrorPolicy;
use crate::model::{GenerationRecord, MetadataDocument, QuestionRecord, TableScore};
use crate::services::{ChatMessage, CompletionClient, EmbeddingClient, ServiceError};

use super::corpus::{ColumnIndex, TableDocument, build_column_index, build_table_index};
use super::prompt::build_prompt;
use super::retrieval::{ColumnSelection, Retriever};

pub(crate) const SYSTEM_PROMPT: &str = "\
You are an expert DuckDB SQL generator for the FloodSQL_Bench dataset.
Use only the tables and columns given in the metadata context.
Output only the final SQL query: no reasoning, no explanation, no comments.
Do not end the query with a semicolon and do not wrap it in markdown fences.";

pub(crate) const GENERATION_TEMPERATURE: f32 = 0.0;

/// Per-run state shared by every question: the metadata and both corpora,
/// built once and only read afterwards.
pub(crate) struct RunContext {
    pub(crate) metadata: MetadataDocument,
    pub(crate) table_index: Vec<TableDocument>,
    pub(crate) column_index: ColumnIndex,
}

impl RunContext {
    pub(crate) fn new(metadata: MetadataDocument) -> Self {
        let table_index = build_table_index(&metadata);
        let column_index = build_column_index(&metadata);
        Self {
            metadata,
            table_index,
            column_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenerationStage {
    Retrieving,
    PromptBuilding,
    Completing,
    PostProcessing,
    Emitted,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Retrieving => "retrieving",
            Self::PromptBuilding => "prompt_building",
            Self::Completing => "completing",
            Self::PostProcessing => "post_processing",
            Self::Emitted => "emitted",
        };
        f.write_str(label)
    }
}

/// Harder tiers get a wider table selection.
pub(crate) fn retrieval_breadth(tier: &str) -> usize {
    match tier {
        "L0" => 3,
        "L1" | "L2" => 4,
        _ => 5,
    }
}

/// Strips markdown fences and flattens the statement onto one line.
pub(crate) fn post_process_sql(raw: &str) -> String {
    let without_fences = raw.trim().replace("```sql", "").replace("```", "");
    without_fences.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub(crate) fn user_prompt(question: &str) -> String {
    format!("Question:\n{question}\n\nReturn only a single valid DuckDB SQL query.")
}

pub(crate) struct Generator<'a> {
    context: &'a RunContext,
    retriever: Retriever<'a>,
    completer: &'a dyn CompletionClient,
    on_retrieval_error: RetrievalErrorPolicy,
}

struct Retrieval {
    tables: Vec<String>,
    scores: Vec<TableScore>,
    columns: Vec<ColumnSelection>,
}

impl<'a> Generator<'a> {
    pub(crate) fn new(
        context: &'a RunContext,
        embedder: &'a dyn EmbeddingClient,
        completer: &'a dyn CompletionClient,
        on_retrieval_error: RetrievalErrorPolicy,
    ) -> Self {
        Self {
            context,
            retriever: Retriever::new(embedder),
            completer,
            on_retrieval_error,
        }
    }

    /// Runs one question through retrieval, prompting, and completion. Only
    /// a retrieval failure under the `fail` policy returns an error; every
    /// other failure yields a record with `generated_sql: None`.
    pub(crate) fn generate(&self, record: &QuestionRecord) -> Result<GenerationRecord> {
        let tier = record.tier();
        let top_k = retrieval_breadth(tier);
        info!(id = %record.id, tier, top_k, "processing question");

        let mut stage = GenerationStage::Retrieving;
        let retrieval = match self.retrieve(&record.question, top_k) {
            Ok(retrieval) => retrieval,
            Err(err) => match self.on_retrieval_error {
                RetrievalErrorPolicy::Fail => {
                    return Err(anyhow::Error::new(err)
                        .context(format!("retrieval failed for {}", record.id)));
                }
                RetrievalErrorPolicy::EmitNull => {
                    error!(id = %record.id, %stage, error = %err, "retrieval failed; emitting null sql");
                    return Ok(self.emit(record, None, Retrieval::empty()));
                }
            },
        };

        stage = GenerationStage::PromptBuilding;
        debug!(id = %record.id, %stage, tables = ?retrieval.tables, "retrieval completed");
        let metadata_prompt = build_prompt(
            &self.context.metadata,
            &retrieval.tables,
            &retrieval.columns,
        );
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::system(metadata_prompt),
            ChatMessage::user(user_prompt(&record.question)),
        ];

        stage = GenerationStage::Completing;
        let generated_sql = match self.completer.complete(&messages, GENERATION_TEMPERATURE) {
            Ok(raw) => {
                stage = GenerationStage::PostProcessing;
                let sql = post_process_sql(&raw);
                if sql.is_empty() {
                    warn!(id = %record.id, %stage, "completion contained no sql");
                    None
                } else {
                    Some(sql)
                }
            }
            Err(err) => {
                log_completion_failure(&record.id, stage, &err);
                None
            }
        };

        Ok(self.emit(record, generated_sql, retrieval))
    }

    fn retrieve(&self, question: &str, top_k: usize) -> Result<Retrieval, ServiceError> {
        let (tables, scores) =
            self.retriever
                .retrieve_tables(question, &self.context.table_index, top_k)?;
        let columns =
            self.retriever
                .retrieve_columns(question, &self.context.column_index, &tables)?;
        Ok(Retrieval {
            tables,
            scores,
            columns,
        })
    }

    fn emit(
        &self,
        record: &QuestionRecord,
        generated_sql: Option<String>,
        retrieval: Retrieval,
    ) -> GenerationRecord {
        debug!(
            id = %record.id,
            stage = %GenerationStage::Emitted,
            has_sql = generated_sql.is_some(),
            "generation record ready"
        );
        GenerationRecord {
            id: record.id.clone(),
            question: record.question.clone(),
            gt_sql: record.sql.clone(),
            generated_sql,
            chosen_tables: retrieval.tables,
            chosen_columns: retrieval
                .columns
                .into_iter()
                .map(|selection| {
                    let names = selection
                        .columns
                        .into_iter()
                        .map(|column| column.column)
                        .collect::<Vec<String>>();
                    (selection.table, names)
                })
                .collect(),
            table_scores: retrieval.scores,
        }
    }
}

impl Retrieval {
    fn empty() -> Self {
        Self {
            tables: Vec::new(),
            scores: Vec::new(),
            columns: Vec::new(),
        }
    }
}

fn log_completion_failure(id: &str, stage: GenerationStage, err: &ServiceError) {
    error!(id, %stage, error = %err, "completion failed; emitting null sql");
}
