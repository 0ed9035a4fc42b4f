use std::sync::Mutex;

use super::run::render_summary;
use super::scoring::{
    BackendReport, EMPTY_GEN_SENTINEL, EMPTY_GT_SENTINEL, TierAccumulator, evaluate,
    prepare_pairs, score_pairs,
};
use crate::model::ScoredRecord;
use crate::semantic::DEFAULT_EMBEDDING_DIM;
use crate::services::{EmbeddingClient, LocalHashEmbedder, ServiceResult};

fn scored(id: &str, gt_sql: Option<&str>, generated_sql: Option<&str>) -> ScoredRecord {
    ScoredRecord {
        id: id.to_string(),
        gt_sql: gt_sql.map(str::to_string),
        generated_sql: generated_sql.map(str::to_string),
    }
}

fn mean_for(report: &BackendReport, tier: &str) -> Option<f64> {
    report
        .tiers
        .iter()
        .find(|entry| entry.tier == tier)
        .and_then(|entry| entry.mean)
}

struct RecordingEmbedder {
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingEmbedder {
    fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }
}

impl EmbeddingClient for RecordingEmbedder {
    fn model_id(&self) -> &str {
        "recording"
    }

    fn embed_batch(&self, texts: &[&str]) -> ServiceResult<Vec<Vec<f32>>> {
        self.batches
            .lock()
            .expect("lock")
            .push(texts.iter().map(|text| text.to_string()).collect());
        Ok(texts
            .iter()
            .map(|text| vec![text.len() as f32, 1.0])
            .collect())
    }
}

struct ShortEmbedder;

impl EmbeddingClient for ShortEmbedder {
    fn model_id(&self) -> &str {
        "short"
    }

    fn embed_batch(&self, _texts: &[&str]) -> ServiceResult<Vec<Vec<f32>>> {
        Ok(vec![vec![1.0, 0.0]])
    }
}

#[test]
fn missing_or_blank_sql_is_replaced_by_sentinels() {
    let pairs = prepare_pairs(&[
        scored("L0_0001", None, Some("SELECT 1")),
        scored("L1_0001", Some("   "), None),
        scored("L2_0001", Some("SELECT 2"), Some("")),
    ]);

    assert_eq!(pairs[0].gt_sql, EMPTY_GT_SENTINEL);
    assert_eq!(pairs[0].generated_sql, "SELECT 1");
    assert_eq!(pairs[1].gt_sql, EMPTY_GT_SENTINEL);
    assert_eq!(pairs[1].generated_sql, EMPTY_GEN_SENTINEL);
    assert_eq!(pairs[2].gt_sql, "SELECT 2");
    assert_eq!(pairs[2].generated_sql, EMPTY_GEN_SENTINEL);
}

#[test]
fn non_blank_sql_is_embedded_verbatim() {
    let pairs = prepare_pairs(&[scored(
        "L3_0001",
        Some("  SELECT COUNT(*)\nFROM claims  "),
        Some("\tSELECT 1 "),
    )]);

    assert_eq!(pairs[0].gt_sql, "  SELECT COUNT(*)\nFROM claims  ");
    assert_eq!(pairs[0].generated_sql, "\tSELECT 1 ");

    let embedder = RecordingEmbedder::new();
    score_pairs(&embedder, &pairs, 32).expect("scores");
    let batches = embedder.batches.lock().expect("lock");
    assert_eq!(batches[0], vec!["  SELECT COUNT(*)\nFROM claims  "]);
    assert_eq!(batches[1], vec!["\tSELECT 1 "]);
}

#[test]
fn pairs_are_bucketed_by_id_prefix() {
    let pairs = prepare_pairs(&[
        scored("L4_0001", Some("a"), Some("a")),
        scored("L4_9999", Some("b"), Some("b")),
        scored("foo", Some("c"), Some("c")),
    ]);
    let tiers = pairs
        .iter()
        .map(|pair| pair.tier.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(tiers, vec!["L4", "L4", "foo"]);
}

#[test]
fn embeddings_are_requested_in_fixed_size_batches() {
    let embedder = RecordingEmbedder::new();
    let records = (0..5)
        .map(|index| {
            scored(
                &format!("L0_{index:04}"),
                Some(&format!("SELECT {index}")),
                Some("SELECT x"),
            )
        })
        .collect::<Vec<ScoredRecord>>();

    let scores = score_pairs(&embedder, &prepare_pairs(&records), 2).expect("scores");
    assert_eq!(scores.len(), 5);

    let batches = embedder.batches.lock().expect("lock");
    let sizes = batches.iter().map(Vec::len).collect::<Vec<usize>>();
    assert_eq!(sizes, vec![2, 2, 2, 2, 1, 1]);
    assert_eq!(batches[0], vec!["SELECT 0", "SELECT 1"]);
    assert_eq!(batches[1], vec!["SELECT x", "SELECT x"]);
}

#[test]
fn identical_sql_scores_one_and_empty_tiers_have_no_mean() {
    let embedder = LocalHashEmbedder::new(DEFAULT_EMBEDDING_DIM);
    let records = vec![
        scored(
            "L0_0001",
            Some("SELECT COUNT(*) FROM claims"),
            Some("SELECT COUNT(*) FROM claims"),
        ),
        scored(
            "L0_0002",
            Some("SELECT NAME FROM county"),
            Some("SELECT NAME FROM county"),
        ),
        scored(
            "L3_0001",
            Some("SELECT GEOID FROM county"),
            Some("SELECT AVG(amountPaidOnBuildingClaim) FROM claims"),
        ),
    ];

    let reports =
        evaluate(&records, &[&embedder as &dyn EmbeddingClient], 32).expect("evaluation");
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.pair_count, 3);

    let l0 = mean_for(report, "L0").expect("L0 mean");
    assert!((l0 - 1.0).abs() < 1e-6);
    let l3 = mean_for(report, "L3").expect("L3 mean");
    assert!(l3 < 1.0);
    assert!(mean_for(report, "L1").is_none());
    assert!(mean_for(report, "L5").is_none());
}

#[test]
fn each_backend_is_reported_separately() {
    let local = LocalHashEmbedder::new(DEFAULT_EMBEDDING_DIM);
    let recording = RecordingEmbedder::new();
    let records = vec![scored("L1_0001", Some("SELECT 1"), Some("SELECT 1"))];

    let backends: [&dyn EmbeddingClient; 2] = [&local, &recording];
    let reports = evaluate(&records, &backends, 32).expect("evaluation");
    let names = reports
        .iter()
        .map(|report| report.backend.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(names, vec!["local-hash-v1", "recording"]);
}

#[test]
fn tier_means_list_fixed_tiers_then_extra_tiers() {
    let mut accumulator = TierAccumulator::default();
    accumulator.record("L2", 0.5);
    accumulator.record("L2", 1.0);
    accumulator.record("foo", 0.25);
    accumulator.record("A1", 0.75);

    let means = accumulator.means();
    let tiers = means
        .iter()
        .map(|entry| entry.tier.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(tiers, vec!["L0", "L1", "L2", "L3", "L4", "L5", "A1", "foo"]);
    assert_eq!(means[2].count, 2);
    assert_eq!(means[2].mean, Some(0.75));
    assert_eq!(means[0].count, 0);
    assert_eq!(means[0].mean, None);
    assert_eq!(means[7].mean, Some(0.25));
}

#[test]
fn embedding_count_mismatch_is_an_invalid_response() {
    let records = vec![
        scored("L0_0001", Some("a"), Some("b")),
        scored("L0_0002", Some("c"), Some("d")),
    ];
    let err = score_pairs(&ShortEmbedder, &prepare_pairs(&records), 32)
        .expect_err("short response must fail");
    assert!(!err.is_transient());
}

#[test]
fn summary_renders_missing_means_as_dash() {
    let mut accumulator = TierAccumulator::default();
    accumulator.record("L0", 0.9);
    let report = BackendReport {
        backend: "text-embedding-3-large".to_string(),
        pair_count: 1,
        tiers: accumulator.means(),
    };

    let text = render_summary(&[report]);
    assert!(text.starts_with("Backend: text-embedding-3-large (pairs=1)\n"));
    assert!(text.contains("\tL0\tn=1\tmean=0.9000\n"));
    assert!(text.contains("\tL1\tn=0\tmean=-\n"));
}
