use serde::Serialize;

use crate::{
    error::{Error, Result},
    note::NoteMetadata,
};

/// A stored note matched by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResult {
    pub id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    pub metadata: NoteMetadata,
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns 0 when either vector has zero magnitude. The result is clamped
/// to `[-1, 1]` to absorb rounding error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return Ok(0.0);
    }

    Ok((dot / denominator).clamp(-1.0, 1.0) as f32)
}

/// Sort by score descending and keep the first `limit` results.
pub fn rank(
    mut results: Vec<SimilarityResult>,
    limit: usize,
) -> Vec<SimilarityResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    results
}
