use serde::{Deserialize, Serialize};

/// OpenAI embeddings request
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiEmbedRequest<'a> {
    /// Model name (e.g., "text-embedding-3-small")
    pub model: &'a str,

    /// Texts to embed
    pub input: &'a [String],

    /// Requested output size
    pub dimensions: usize,
}

/// OpenAI embeddings response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiEmbedResponse {
    pub data: Vec<OpenAiEmbedding>,

    #[serde(default)]
    pub model: Option<String>,
}

/// One vector of an OpenAI embeddings response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiEmbedding {
    /// Position of the matching input
    pub index: usize,

    pub embedding: Vec<f32>,
}

/// Ollama embedding request
#[derive(Debug, Clone, Serialize)]
pub struct OllamaEmbedRequest<'a> {
    /// Model name (e.g., "nomic-embed-text")
    pub model: &'a str,

    /// Text to embed
    pub prompt: &'a str,
}

/// Ollama embedding response
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaEmbedResponse {
    /// Embedding vector
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// Ollama `/api/tags` response
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaTagsResponse {
    #[serde(default)]
    pub models: Vec<OllamaModelTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModelTag {
    pub name: String,
}

impl OllamaTagsResponse {
    /// Whether `model` is installed, with or without an explicit tag
    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| {
            m.name == model || m.name.split(':').next() == Some(model)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_request_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let request = OpenAiEmbedRequest {
            model: "text-embedding-3-small",
            input: &input,
            dimensions: 384,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["a", "b"],
                "dimensions": 384
            })
        );
    }

    #[test]
    fn test_openai_response_model_is_optional() {
        let response: OpenAiEmbedResponse = serde_json::from_str(
            r#"{"object":"list","data":[{"index":0,"embedding":[0.5]}],"model":"text-embedding-3-small"}"#,
        )
        .unwrap();
        assert_eq!(response.model.as_deref(), Some("text-embedding-3-small"));

        let response: OpenAiEmbedResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[0.5]}]}"#).unwrap();
        assert!(response.model.is_none());
        assert_eq!(response.data[0].embedding, vec![0.5]);
    }

    #[test]
    fn test_ollama_has_model() {
        let tags: OllamaTagsResponse = serde_json::from_str(
            r#"{"models":[{"name":"nomic-embed-text:latest"},{"name":"llama3.2:3b"}]}"#,
        )
        .unwrap();
        assert!(tags.has_model("nomic-embed-text"));
        assert!(tags.has_model("nomic-embed-text:latest"));
        assert!(!tags.has_model("mxbai-embed-large"));
    }
}
