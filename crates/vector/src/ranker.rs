use archrule_common::ArchRuleError;
use serde_json::Value;
use tracing::{debug, warn};

use crate::similarity::cosine_similarity;
use crate::types::{GuidanceRecord, ScoredGuidance};

/// Ranked candidates plus the number skipped as malformed
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub results: Vec<ScoredGuidance>,
    pub skipped: usize,
}

/// Cosine ranker over stored guidance records
#[derive(Debug, Clone, Copy, Default)]
pub struct Ranker {
    min_similarity: Option<f32>,
}

impl Ranker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop candidates scoring below `threshold` before truncation
    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    /// Score, sort (descending, ties in input order) and truncate to `limit`
    pub fn rank(&self, query: &[f32], candidates: Vec<GuidanceRecord>, limit: usize) -> Ranking {
        if limit == 0 {
            return Ranking::default();
        }

        let total = candidates.len();
        let mut skipped = 0;
        let mut results = Vec::with_capacity(total);

        for mut record in candidates {
            let vector = match parse_stored(&record, query.len()) {
                Ok(vector) => vector,
                Err(e) => {
                    warn!("Skipping candidate: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let similarity = cosine_similarity(query, &vector);
            if self.min_similarity.is_some_and(|min| similarity < min) {
                continue;
            }

            record.embedding = None;
            results.push(ScoredGuidance::from_record(record, similarity));
        }

        // sort_by is stable, so equal scores keep fetch order
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(limit);

        debug!(
            "Ranked {} of {} candidates ({} skipped)",
            results.len(),
            total,
            skipped
        );
        Ranking { results, skipped }
    }
}

fn parse_stored(record: &GuidanceRecord, expected: usize) -> Result<Vec<f32>, ArchRuleError> {
    let raw = record
        .embedding
        .as_ref()
        .ok_or_else(|| ArchRuleError::malformed_embedding(&record.id, "no embedding"))?;
    let vector =
        parse_embedding(raw).map_err(|reason| ArchRuleError::malformed_embedding(&record.id, reason))?;

    if vector.len() != expected {
        return Err(ArchRuleError::malformed_embedding(
            &record.id,
            format!("length {} does not match query length {}", vector.len(), expected),
        ));
    }
    Ok(vector)
}

/// Decode a persisted vector: a JSON array of numbers, or a string holding one
pub fn parse_embedding(raw: &Value) -> Result<Vec<f32>, String> {
    let values = match raw {
        Value::Array(values) => values.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(values)) => values,
            Ok(_) => return Err("string payload is not an array".to_string()),
            Err(e) => return Err(format!("unparseable payload: {}", e)),
        },
        other => return Err(format!("unexpected payload type: {}", type_name(other))),
    };

    if values.is_empty() {
        return Err("empty vector".to_string());
    }

    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = v
                .as_f64()
                .ok_or_else(|| format!("element {} is not a number", i))? as f32;
            if x.is_finite() {
                Ok(x)
            } else {
                Err(format!("element {} is not finite", i))
            }
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
