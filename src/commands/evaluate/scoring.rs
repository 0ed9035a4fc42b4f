use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::model::{ScoredRecord, tier_of};
use crate::semantic::cosine_similarity;
use crate::services::{EmbeddingClient, ServiceError, ServiceResult};

pub(crate) const EMPTY_GT_SENTINEL: &str = "[EMPTY_GT_SQL]";
pub(crate) const EMPTY_GEN_SENTINEL: &str = "[EMPTY_GEN_SQL]";

/// Tiers reported even when no record falls into them.
pub(crate) const REPORTED_TIERS: [&str; 6] = ["L0", "L1", "L2", "L3", "L4", "L5"];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EvaluationPair {
    pub(crate) tier: String,
    pub(crate) gt_sql: String,
    pub(crate) generated_sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TierMean {
    pub(crate) tier: String,
    pub(crate) count: usize,
    pub(crate) mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct BackendReport {
    pub(crate) backend: String,
    pub(crate) pair_count: usize,
    pub(crate) tiers: Vec<TierMean>,
}

pub(crate) fn prepare_pairs(records: &[ScoredRecord]) -> Vec<EvaluationPair> {
    records
        .iter()
        .map(|record| EvaluationPair {
            tier: tier_of(&record.id).to_string(),
            gt_sql: substitute_empty(record.gt_sql.as_deref(), EMPTY_GT_SENTINEL),
            generated_sql: substitute_empty(record.generated_sql.as_deref(), EMPTY_GEN_SENTINEL),
        })
        .collect()
}

fn substitute_empty(value: Option<&str>, sentinel: &str) -> String {
    match value {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => sentinel.to_string(),
    }
}

/// Cosine similarity per pair, in input order. Each batch embeds the
/// ground-truth side and the generated side as two requests.
pub(crate) fn score_pairs(
    embedder: &dyn EmbeddingClient,
    pairs: &[EvaluationPair],
    batch_size: usize,
) -> ServiceResult<Vec<f64>> {
    let mut scores = Vec::<f64>::with_capacity(pairs.len());

    for (batch_index, batch) in pairs.chunks(batch_size.max(1)).enumerate() {
        let gt_texts = batch
            .iter()
            .map(|pair| pair.gt_sql.as_str())
            .collect::<Vec<&str>>();
        let generated_texts = batch
            .iter()
            .map(|pair| pair.generated_sql.as_str())
            .collect::<Vec<&str>>();

        let gt_embeddings = embedder.embed_batch(&gt_texts)?;
        let generated_embeddings = embedder.embed_batch(&generated_texts)?;
        if gt_embeddings.len() != batch.len() || generated_embeddings.len() != batch.len() {
            return Err(ServiceError::InvalidResponse {
                service: "embedding",
                message: format!(
                    "expected {} embeddings per side, got {} and {}",
                    batch.len(),
                    gt_embeddings.len(),
                    generated_embeddings.len()
                ),
            });
        }

        scores.extend(
            gt_embeddings
                .iter()
                .zip(&generated_embeddings)
                .map(|(gt, generated)| cosine_similarity(gt, generated)),
        );
        debug!(
            backend = embedder.model_id(),
            batch = batch_index,
            scored = scores.len(),
            "evaluation batch scored"
        );
    }

    Ok(scores)
}

#[derive(Debug, Default)]
pub(crate) struct TierAccumulator {
    buckets: BTreeMap<String, Vec<f64>>,
}

impl TierAccumulator {
    pub(crate) fn record(&mut self, tier: &str, score: f64) {
        self.buckets.entry(tier.to_string()).or_default().push(score);
    }

    /// The fixed `L0`..`L5` tiers first, then any other observed tier in
    /// lexical order.
    pub(crate) fn means(&self) -> Vec<TierMean> {
        let mut tiers = REPORTED_TIERS
            .iter()
            .map(|tier| tier.to_string())
            .collect::<Vec<String>>();
        tiers.extend(
            self.buckets
                .keys()
                .filter(|tier| !REPORTED_TIERS.contains(&tier.as_str()))
                .cloned(),
        );

        tiers
            .into_iter()
            .map(|tier| {
                let scores = self.buckets.get(&tier).map(Vec::as_slice).unwrap_or(&[]);
                TierMean {
                    count: scores.len(),
                    mean: mean(scores),
                    tier,
                }
            })
            .collect()
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub(crate) fn evaluate_backend(
    embedder: &dyn EmbeddingClient,
    pairs: &[EvaluationPair],
    batch_size: usize,
) -> ServiceResult<BackendReport> {
    let scores = score_pairs(embedder, pairs, batch_size)?;
    let mut accumulator = TierAccumulator::default();
    for (pair, score) in pairs.iter().zip(scores) {
        accumulator.record(&pair.tier, score);
    }

    Ok(BackendReport {
        backend: embedder.model_id().to_string(),
        pair_count: pairs.len(),
        tiers: accumulator.means(),
    })
}

/// Scores every record under each backend independently.
pub(crate) fn evaluate(
    records: &[ScoredRecord],
    backends: &[&dyn EmbeddingClient],
    batch_size: usize,
) -> ServiceResult<Vec<BackendReport>> {
    let pairs = prepare_pairs(records);
    backends
        .iter()
        .map(|embedder| evaluate_backend(*embedder, &pairs, batch_size))
        .collect()
}
