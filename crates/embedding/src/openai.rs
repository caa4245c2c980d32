use archrule_common::{ArchRuleError, BackendKind, OpenAiConfig, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::EmbeddingBackend;
use crate::text::{fit_dimensions, normalize_text};
use crate::types::{OpenAiEmbedRequest, OpenAiEmbedResponse};

/// OpenAI embeddings API client
///
/// Requests vectors at the configured size through the `dimensions`
/// parameter and accepts up to `max_batch_size` texts per call.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    max_batch_size: usize,
    client: Client,
}

impl OpenAiBackend {
    /// Create new OpenAI client
    pub fn new(config: &OpenAiConfig, dimensions: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        info!("OpenAI embedding client initialized: {} ({})", config.base_url, config.model);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            dimensions,
            max_batch_size: config.max_batch_size.max(1),
            client,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ArchRuleError::backend_unavailable("OPENAI_API_KEY not set"))
    }

    /// One request for all `texts`, returned in input order
    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self.api_key()?;
        let url = format!("{}/embeddings", self.base_url);
        let input: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();

        debug!(
            "Sending embedding request to OpenAI - Model: {}, Inputs: {}",
            self.model,
            input.len()
        );

        let request = OpenAiEmbedRequest {
            model: &self.model,
            input: &input,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ArchRuleError::network(format!("OpenAI embedding API error: {}", e)))?;

        let mut result: OpenAiEmbedResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse OpenAI embedding response: {}", e))?;

        if let Some(model) = result.model.as_deref().filter(|m| *m != self.model) {
            debug!("OpenAI served {} for requested model {}", model, self.model);
        }

        if result.data.len() != texts.len() {
            return Err(ArchRuleError::batch_embedding(format!(
                "OpenAI returned {} embeddings for {} inputs",
                result.data.len(),
                texts.len()
            )));
        }

        result.data.sort_by_key(|item| item.index);
        if result.data.iter().enumerate().any(|(i, item)| item.index != i) {
            return Err(ArchRuleError::batch_embedding(
                "OpenAI response indices do not match the inputs",
            ));
        }

        Ok(result
            .data
            .into_iter()
            .map(|item| fit_dimensions(item.embedding, self.dimensions))
            .collect())
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Key present and the models endpoint accepts it
    async fn probe(&self) -> Result<()> {
        let api_key = self.api_key()?;
        let url = format!("{}/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| {
                ArchRuleError::backend_unavailable(format!("Failed to connect to OpenAI: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ArchRuleError::backend_unavailable(format!(
                "OpenAI rejected probe with status {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if normalize_text(text).is_empty() {
            return Err(ArchRuleError::embedding("cannot embed empty text"));
        }

        let mut vectors = self
            .request_embeddings(std::slice::from_ref(&text.to_string()))
            .await
            .map_err(|e| ArchRuleError::embedding(e.to_string()))?;

        vectors
            .pop()
            .ok_or_else(|| ArchRuleError::embedding("Empty embedding from OpenAI"))
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > self.max_batch_size {
            return Err(ArchRuleError::batch_embedding(format!(
                "{} texts exceed the OpenAI batch limit of {}",
                texts.len(),
                self.max_batch_size
            )));
        }

        self.request_embeddings(texts)
            .await
            .map_err(|e| ArchRuleError::batch_embedding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};

    fn config(base_url: &str, api_key: Option<&str>) -> OpenAiConfig {
        OpenAiConfig {
            api_key: api_key.map(str::to_string),
            base_url: base_url.to_string(),
            model: "text-embedding-3-small".to_string(),
            max_batch_size: 4,
        }
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer test-key")
    }

    /// Fake API: the vector for input `i` is `[len(text), i]` padded with the
    /// requested number of dimensions. Data comes back in reverse order.
    async fn embeddings(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
        }
        let dims = body["dimensions"].as_u64().unwrap() as usize;
        let inputs = body["input"].as_array().unwrap();
        if inputs.iter().any(|t| t.as_str() == Some("boom")) {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"})));
        }
        let mut data: Vec<Value> = inputs
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let mut v = vec![0.0f32; dims];
                v[0] = text.as_str().unwrap().len() as f32;
                v[1] = i as f32;
                json!({"object": "embedding", "index": i, "embedding": v})
            })
            .collect();
        data.reverse();
        (StatusCode::OK, Json(json!({"object": "list", "data": data, "model": "text-embedding-3-small"})))
    }

    async fn models(headers: HeaderMap) -> StatusCode {
        if authorized(&headers) {
            StatusCode::OK
        } else {
            StatusCode::UNAUTHORIZED
        }
    }

    async fn serve() -> String {
        let app = Router::new()
            .route("/v1/embeddings", post(embeddings))
            .route("/v1/models", get(models));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn backend(base_url: &str, api_key: Option<&str>) -> OpenAiBackend {
        OpenAiBackend::new(&config(base_url, api_key), 8, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_probe_requires_key() {
        let url = serve().await;
        assert!(backend(&url, Some("test-key")).probe().await.is_ok());

        let err = backend(&url, None).probe().await.unwrap_err();
        assert!(matches!(err, ArchRuleError::BackendUnavailable(_)));

        let err = backend(&url, Some("wrong")).probe().await.unwrap_err();
        assert!(matches!(err, ArchRuleError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let url = serve().await;
        let texts: Vec<String> = vec!["a".into(), "bbb".into(), " cc\n".into()];
        let vectors = backend(&url, Some("test-key")).embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == 8));
        assert_eq!(&vectors[0][..2], &[1.0, 0.0]);
        assert_eq!(&vectors[1][..2], &[3.0, 1.0]);
        // Whitespace is normalized before submission
        assert_eq!(&vectors[2][..2], &[2.0, 2.0]);
    }

    #[tokio::test]
    async fn test_batch_failure_is_whole_batch_error() {
        let url = serve().await;
        let texts: Vec<String> = vec!["ok".into(), "boom".into()];
        let err = backend(&url, Some("test-key")).embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, ArchRuleError::BatchEmbeddingFailed(_)));
    }

    #[tokio::test]
    async fn test_batch_over_limit_is_rejected() {
        let url = serve().await;
        let texts: Vec<String> = (0..5).map(|i| format!("t{}", i)).collect();
        assert!(backend(&url, Some("test-key")).embed_batch(&texts).await.is_err());
    }

    #[tokio::test]
    async fn test_single_embed() {
        let url = serve().await;
        let v = backend(&url, Some("test-key")).embed("hello").await.unwrap();
        assert_eq!(v.len(), 8);
        assert_eq!(v[0], 5.0);

        let err = backend(&url, Some("test-key")).embed("  ").await.unwrap_err();
        assert!(matches!(err, ArchRuleError::EmbeddingFailed(_)));
    }
}
