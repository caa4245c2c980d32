use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Architectural guidance record as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceRecord {
    /// Store identifier (numeric ids are held as strings)
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// Human-readable key, e.g. "ARCH-001"
    pub rule_id: String,

    pub title: String,

    pub guidance: String,

    #[serde(default)]
    pub rationale: Option<String>,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub priority: String,

    /// Visibility scope; `None` is global
    #[serde(default)]
    pub project_id: Option<String>,

    /// Raw persisted vector: a JSON array, or a string holding one
    #[serde(default)]
    pub embedding: Option<Value>,

    #[serde(default)]
    pub last_retrieved: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub tech_stacks: Vec<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub keywords: Vec<String>,
}

impl GuidanceRecord {
    /// New global record without an embedding
    pub fn new(
        id: impl Into<String>,
        rule_id: impl Into<String>,
        title: impl Into<String>,
        guidance: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rule_id: rule_id.into(),
            title: title.into(),
            guidance: guidance.into(),
            rationale: None,
            category: String::new(),
            priority: String::new(),
            project_id: None,
            embedding: None,
            last_retrieved: None,
            contexts: Vec::new(),
            tech_stacks: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: &[f32]) -> Self {
        self.embedding = Some(Value::from(embedding.to_vec()));
        self
    }

    pub fn with_raw_embedding(mut self, embedding: Value) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>, priority: impl Into<String>) -> Self {
        self.category = category.into();
        self.priority = priority.into();
        self
    }

    pub fn is_global(&self) -> bool {
        self.project_id.is_none()
    }
}

/// Search hit: the record without its vector, plus the score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredGuidance {
    pub id: String,
    pub rule_id: String,
    pub title: String,
    pub guidance: String,
    pub rationale: Option<String>,
    pub category: String,
    pub priority: String,
    pub project_id: Option<String>,
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub tech_stacks: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Cosine similarity to the query (-1.0 to 1.0)
    pub similarity: f32,
}

impl ScoredGuidance {
    pub fn from_record(record: GuidanceRecord, similarity: f32) -> Self {
        Self {
            id: record.id,
            rule_id: record.rule_id,
            title: record.title,
            guidance: record.guidance,
            rationale: record.rationale,
            category: record.category,
            priority: record.priority,
            project_id: record.project_id,
            contexts: record.contexts,
            tech_stacks: record.tech_stacks,
            keywords: record.keywords,
            similarity,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_postgrest_row() {
        let row = json!({
            "id": 42,
            "rule_id": "ARCH-001",
            "title": "Layered architecture",
            "guidance": "Keep controllers thin",
            "rationale": null,
            "category": "architecture",
            "priority": "high",
            "project_id": null,
            "embedding": "[0.1,0.2]",
            "last_retrieved": "2024-05-01T10:00:00+00:00",
            "contexts": null,
            "keywords": ["mvc"]
        });

        let record: GuidanceRecord = serde_json::from_value(row).unwrap();
        assert_eq!(record.id, "42");
        assert!(record.is_global());
        assert_eq!(record.embedding, Some(json!("[0.1,0.2]")));
        assert!(record.last_retrieved.is_some());
        assert!(record.contexts.is_empty());
        assert_eq!(record.keywords, vec!["mvc"]);
        assert!(record.tech_stacks.is_empty());
    }

    #[test]
    fn test_record_rejects_object_id() {
        let row = json!({"id": {"x": 1}, "rule_id": "R", "title": "t", "guidance": "g"});
        assert!(serde_json::from_value::<GuidanceRecord>(row).is_err());
    }

    #[test]
    fn test_scored_guidance_drops_embedding() {
        let record = GuidanceRecord::new("1", "SEC-002", "Validate input", "Validate at the boundary")
            .with_embedding(&[1.0, 0.0])
            .with_project("team-a");

        let scored = ScoredGuidance::from_record(record, 0.5);
        let json = serde_json::to_value(&scored).unwrap();

        assert!(json.get("embedding").is_none());
        assert_eq!(json["project_id"], "team-a");
        assert_eq!(json["similarity"], 0.5);
    }
}
