use ndarray::{Array1, ArrayView1};

/// Cosine similarity between two equal-length vectors, in [-1, 1]
///
/// Accumulates in f64. Returns 0.0 when the lengths differ, either vector
/// is empty, or either has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let a: Array1<f64> = ArrayView1::from(a).mapv(f64::from);
    let b: Array1<f64> = ArrayView1::from(b).mapv(f64::from);

    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }

    (a.dot(&b) / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32
}
