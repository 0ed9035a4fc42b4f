use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::semantic::DEFAULT_MODEL_ID;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_COMPLETION_MODEL: &str = "huggingface/deepseek-ai/DeepSeek-V3.2";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_SECONDARY_EMBEDDING_MODEL: &str = "jina_ai/jina-embeddings-v3";

#[derive(Parser, Debug)]
#[command(
    name = "floodsql",
    version,
    about = "Text-to-SQL RAG benchmark harness for the FloodSQL dataset"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    BuildMetadata(BuildMetadataArgs),
    RunGold(RunGoldArgs),
    Generate(GenerateArgs),
    Evaluate(EvaluateArgs),
}

/// Connection settings shared by every command that talks to the embedding
/// or completion service.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    #[arg(long, env = "FLOODSQL_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    #[arg(long, env = "FLOODSQL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = 60)]
    pub request_timeout_seconds: u64,

    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, default_value_t = 1200)]
    pub retry_backoff_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct BuildMetadataArgs {
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "data/field_descriptions.json")]
    pub descriptions_path: PathBuf,

    #[arg(long, default_value = "data/metadata_parquet.json")]
    pub output_path: PathBuf,

    #[arg(long, default_value_t = 3)]
    pub sample_rows: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RunGoldArgs {
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Run without the DuckDB spatial extension.
    #[arg(long)]
    pub skip_spatial: bool,

    #[arg(long)]
    pub questions_path: PathBuf,

    #[arg(long, default_value = "results/gold")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 30)]
    pub timeout_seconds: u64,

    #[arg(long, default_value_t = 5)]
    pub limit_output: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RetrievalErrorPolicy {
    EmitNull,
    Fail,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[arg(long, default_value = "data/metadata_parquet.json")]
    pub metadata_path: PathBuf,

    #[arg(long)]
    pub questions_path: PathBuf,

    #[arg(long, default_value = "results/generated.jsonl")]
    pub output_jsonl: PathBuf,

    #[arg(long, default_value = DEFAULT_COMPLETION_MODEL)]
    pub model_name: String,

    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    #[arg(long)]
    pub embedding_cache_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = RetrievalErrorPolicy::EmitNull)]
    pub on_retrieval_error: RetrievalErrorPolicy,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[command(flatten)]
    pub service: ServiceArgs,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long)]
    pub input_jsonl: PathBuf,

    #[arg(
        long = "backend",
        default_values = [DEFAULT_EMBEDDING_MODEL, DEFAULT_SECONDARY_EMBEDDING_MODEL]
    )]
    pub backends: Vec<String>,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[command(flatten)]
    pub service: ServiceArgs,
}

impl ServiceArgs {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// True when the model id selects the offline hashed embedder instead of
/// the HTTP service.
pub fn is_local_embedding_model(model_id: &str) -> bool {
    model_id.trim() == DEFAULT_MODEL_ID
}
