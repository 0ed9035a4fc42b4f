use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::BuildMetadataArgs;
use crate::dataset::{discover_parquet_tables, open_in_memory};
use crate::util::{read_json, write_json_pretty};

use super::builder::build_metadata;
use super::descriptions::DescriptionsDocument;

pub fn run(args: BuildMetadataArgs) -> Result<()> {
    let descriptions = load_descriptions(&args.descriptions_path)?;
    let tables = discover_parquet_tables(&args.data_dir)?;
    if tables.is_empty() {
        bail!("no parquet files found in {}", args.data_dir.display());
    }

    let connection = open_in_memory()?;
    let document = build_metadata(&connection, &tables, &descriptions, args.sample_rows)?;
    let table_count = document.len().saturating_sub(1);
    write_json_pretty(&args.output_path, &document)?;

    info!(
        tables = table_count,
        path = %args.output_path.display(),
        "metadata document written"
    );
    Ok(())
}

fn load_descriptions(path: &Path) -> Result<DescriptionsDocument> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "descriptions file not found; every column will be described as unknown"
        );
        return Ok(DescriptionsDocument::default());
    }
    read_json(path).with_context(|| format!("invalid descriptions document: {}", path.display()))
}
