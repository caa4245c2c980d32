use archrule_common::{ArchRuleError, BackendKind, OllamaConfig, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::EmbeddingBackend;
use crate::text::{fit_dimensions, normalize_text};
use crate::types::{OllamaEmbedRequest, OllamaEmbedResponse, OllamaTagsResponse};

/// Ollama API client
///
/// `/api/embeddings` takes one prompt per call and returns the model's
/// native size, which is fitted to the configured dimensions.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    base_url: String,
    model: String,
    dimensions: usize,
    client: Client,
}

impl OllamaBackend {
    /// Create new Ollama client
    pub fn new(config: &OllamaConfig, dimensions: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        info!("Ollama embedding client initialized: {} ({})", config.base_url, config.model);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Test connection to Ollama
    async fn probe(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            ArchRuleError::backend_unavailable(format!("Failed to connect to Ollama: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(ArchRuleError::backend_unavailable(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        // Ollama pulls on demand, so a missing model is only worth a warning
        match response.json::<OllamaTagsResponse>().await {
            Ok(tags) if !tags.has_model(&self.model) => {
                warn!("Ollama model '{}' is not installed yet", self.model);
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read Ollama model list: {}", e),
        }

        Ok(())
    }

    /// Single attempt to generate embedding
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let prompt = normalize_text(text);

        if prompt.is_empty() {
            return Err(ArchRuleError::embedding("cannot embed empty text"));
        }

        debug!("Generating embedding - Model: {}, Text length: {}", self.model, prompt.len());

        let request = OllamaEmbedRequest {
            model: &self.model,
            prompt: &prompt,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ArchRuleError::embedding(format!("Failed to send embedding request: {}", e)))?
            .error_for_status()
            .map_err(|e| ArchRuleError::embedding(format!("Ollama embedding API error: {}", e)))?;

        let result: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| ArchRuleError::embedding(format!("Failed to parse embedding response: {}", e)))?;

        if result.embedding.is_empty() {
            return Err(ArchRuleError::embedding("Empty embedding from Ollama"));
        }

        debug!("Received embedding - Native dimension: {}", result.embedding.len());
        Ok(fit_dimensions(result.embedding, self.dimensions))
    }
}
