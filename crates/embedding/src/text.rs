//! Text preparation and vector shape helpers shared by all backends

/// Collapse every whitespace run (newlines included) into one space and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Vector of `dimensions` zeros, the placeholder for a failed batch item
pub fn zero_vector(dimensions: usize) -> Vec<f32> {
    vec![0.0; dimensions]
}

/// Bring a native embedding to the configured size.
///
/// Longer vectors keep their leading components and are re-normalized to
/// unit length; shorter vectors are zero-padded.
pub fn fit_dimensions(mut embedding: Vec<f32>, dimensions: usize) -> Vec<f32> {
    use std::cmp::Ordering;

    match embedding.len().cmp(&dimensions) {
        Ordering::Equal => embedding,
        Ordering::Less => {
            embedding.resize(dimensions, 0.0);
            embedding
        }
        Ordering::Greater => {
            embedding.truncate(dimensions);
            let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > f32::EPSILON {
                for v in &mut embedding {
                    *v /= norm;
                }
            }
            embedding
        }
    }
}
