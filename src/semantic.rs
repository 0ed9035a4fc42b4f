use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};

pub const DEFAULT_MODEL_ID: &str = "local-hash-v1";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Guards the denominator against zero-norm vectors such as the embedding of
/// an empty string.
pub const COSINE_EPSILON: f64 = 1e-10;

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embedding_text_hash(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic hashed bag-of-words embedding used for offline runs.
pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let mut tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens.drain(..) {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

/// `dot(a, b) / (|a| * |b| + eps)`, clamped to `[-1, 1]`. Vectors of
/// different length, or empty ones, score zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_squared = 0.0_f64;
    let mut right_squared = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        let left_value = f64::from(*left_value);
        let right_value = f64::from(*right_value);
        dot += left_value * right_value;
        left_squared += left_value * left_value;
        right_squared += right_value * right_value;
    }

    let denominator = left_squared.sqrt() * right_squared.sqrt() + COSINE_EPSILON;
    (dot / denominator).clamp(-1.0, 1.0)
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let mut out = Vec::<f32>::with_capacity(expected_dim);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    if out.len() == expected_dim {
        Some(out)
    } else {
        None
    }
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_vector_with_itself_is_one() {
        let vector = vec![0.3_f32, -1.2, 4.0, 0.0];
        let score = cosine_similarity(&vector, &vector);
        assert!((score - 1.0).abs() < 1e-6, "score was {score}");
    }

    #[test]
    fn cosine_stays_within_bounds() {
        let samples = [
            (vec![1.0_f32, 0.0], vec![-1.0_f32, 0.0]),
            (vec![1e30_f32, 1e30], vec![1e30_f32, 1e30]),
            (vec![1e-30_f32, 0.0], vec![1e-30_f32, 0.0]),
            (vec![0.0_f32, 0.0], vec![1.0_f32, 2.0]),
            (vec![3.0_f32, -7.5, 2.25], vec![-0.5_f32, 9.0, 1.0]),
        ];

        for (left, right) in samples {
            let score = cosine_similarity(&left, &right);
            assert!((-1.0..=1.0).contains(&score), "score {score} out of range");
        }

        let opposite = cosine_similarity(&[2.0, 0.0], &[-3.0, 0.0]);
        assert!((opposite + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero_not_nan() {
        let score = cosine_similarity(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0]);
        assert_eq!(score, 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn local_embedding_is_deterministic_and_normalized() {
        let first = embed_text_local("claims per county GEOID", DEFAULT_EMBEDDING_DIM);
        let second = embed_text_local("claims per county GEOID", DEFAULT_EMBEDDING_DIM);
        assert_eq!(first, second);

        let norm = first
            .iter()
            .map(|value| f64::from(*value) * f64::from(*value))
            .sum::<f64>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let empty = embed_text_local("   ", DEFAULT_EMBEDDING_DIM);
        assert!(empty.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn embedding_blob_decodes_what_was_encoded() {
        let values = vec![0.25_f32, -1.5, 3.0];
        let blob = encode_embedding_blob(&values);
        assert_eq!(decode_embedding_blob(&blob, 3), Some(values));
        assert_eq!(decode_embedding_blob(&blob, 4), None);
    }
}
