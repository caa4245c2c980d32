//! In-process sentence-transformer backend
//!
//! Runs a BERT-style model (`config.json`, `tokenizer.json`,
//! `model.safetensors`) with candle on the blocking thread pool: token
//! embeddings are mean-pooled, L2-normalized and fitted to the configured
//! size. Requires the `candle` feature; without it the backend never probes
//! available.

use archrule_common::{ArchRuleError, BackendKind, LocalModelConfig, ModelFiles, ModelManager, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::backend::EmbeddingBackend;
use crate::text::normalize_text;

/// Texts handed to one blocking inference task
const LOCAL_BATCH_SIZE: usize = 32;

/// Local model backend
pub struct LocalBackend {
    config: LocalModelConfig,
    dimensions: usize,
    models_dir: PathBuf,
    #[cfg(feature = "candle")]
    model: tokio::sync::OnceCell<std::sync::Arc<inference::LoadedModel>>,
}

impl LocalBackend {
    pub fn new(config: &LocalModelConfig, dimensions: usize) -> Self {
        Self {
            config: config.clone(),
            dimensions,
            models_dir: ModelManager::default_models_dir(),
            #[cfg(feature = "candle")]
            model: tokio::sync::OnceCell::new(),
        }
    }

    /// Cache directory used when no explicit `model_dir` is configured
    pub fn with_models_dir(mut self, models_dir: impl Into<PathBuf>) -> Self {
        self.models_dir = models_dir.into();
        self
    }

    /// Locate the model files, downloading them when allowed
    #[cfg_attr(not(feature = "candle"), allow(dead_code))]
    async fn resolve_files(&self) -> Result<ModelFiles> {
        if let Some(dir) = &self.config.model_dir {
            let files = ModelFiles::in_dir(dir);
            if !files.is_complete() {
                return Err(ArchRuleError::backend_unavailable(format!(
                    "Local model at {} is missing {:?}",
                    dir.display(),
                    files.missing()
                )));
            }
            return Ok(files);
        }

        let manager = ModelManager::new(self.models_dir.clone())?;
        let files = ModelFiles::in_dir(manager.model_dir(&self.config.model_id));
        if !files.is_complete() && !self.config.auto_download {
            return Err(ArchRuleError::backend_unavailable(format!(
                "Local model {} not installed and auto_download is off",
                self.config.model_id
            )));
        }

        manager
            .ensure_embedding_model(&self.config.model_id, self.config.weights_sha256.as_deref())
            .await
            .map_err(|e| ArchRuleError::backend_unavailable(format!("Local model unusable: {}", e)))
    }

    #[cfg(feature = "candle")]
    async fn loaded(&self) -> Result<std::sync::Arc<inference::LoadedModel>> {
        self.model
            .get_or_try_init(|| async {
                let files = self.resolve_files().await?;
                let model = tokio::task::spawn_blocking(move || inference::LoadedModel::load(&files))
                    .await
                    .map_err(|e| anyhow::anyhow!("Model loading task failed: {}", e))??;
                tracing::info!("Local embedding model loaded: {}", self.config.model_id);
                Ok::<_, ArchRuleError>(std::sync::Arc::new(model))
            })
            .await
            .cloned()
    }

    #[cfg(feature = "candle")]
    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.loaded().await?;
        let dimensions = self.dimensions;
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| {
                    model
                        .embed(text)
                        .map(|v| crate::text::fit_dimensions(v, dimensions))
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| anyhow::anyhow!("Inference task failed: {}", e))?
    }

    #[cfg(not(feature = "candle"))]
    async fn run(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(unsupported())
    }
}

#[cfg(not(feature = "candle"))]
fn unsupported() -> ArchRuleError {
    ArchRuleError::backend_unavailable("built without the `candle` feature")
}

#[async_trait]
impl EmbeddingBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model(&self) -> &str {
        &self.config.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Loads the model; later calls reuse it
    async fn probe(&self) -> Result<()> {
        #[cfg(feature = "candle")]
        {
            self.loaded().await.map(|_| ())
        }
        #[cfg(not(feature = "candle"))]
        {
            Err(unsupported())
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = normalize_text(text);
        if text.is_empty() {
            return Err(ArchRuleError::embedding("cannot embed empty text"));
        }

        self.run(vec![text])
            .await
            .map_err(|e| ArchRuleError::embedding(e.to_string()))?
            .pop()
            .ok_or_else(|| ArchRuleError::embedding("Local model returned no embedding"))
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        LOCAL_BATCH_SIZE
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();
        if texts.iter().any(String::is_empty) {
            return Err(ArchRuleError::batch_embedding("batch contains empty text"));
        }

        self.run(texts)
            .await
            .map_err(|e| ArchRuleError::batch_embedding(e.to_string()))
    }
}

#[cfg(feature = "candle")]
mod inference {
    use archrule_common::{ArchRuleError, ModelFiles, Result};
    use candle_core::{Device, Tensor};
    use candle_nn::VarBuilder;
    use candle_transformers::models::bert::{BertModel, Config, DTYPE};
    use tokenizers::Tokenizer;

    /// BERT position embedding limit
    const MAX_TOKENS: usize = 512;

    pub struct LoadedModel {
        model: BertModel,
        tokenizer: Tokenizer,
        device: Device,
    }

    fn model_err(e: impl std::fmt::Display) -> ArchRuleError {
        ArchRuleError::embedding(format!("Local model error: {}", e))
    }

    impl LoadedModel {
        pub fn load(files: &ModelFiles) -> Result<Self> {
            let device = Device::Cpu;

            let config: Config = serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
            let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
                ArchRuleError::backend_unavailable(format!("Failed to load tokenizer: {}", e))
            })?;
            let tensors = candle_core::safetensors::load(&files.weights, &device).map_err(|e| {
                ArchRuleError::backend_unavailable(format!("Failed to read weights: {}", e))
            })?;
            let vb = VarBuilder::from_tensors(tensors, DTYPE, &device);
            let model = BertModel::load(vb, &config).map_err(|e| {
                ArchRuleError::backend_unavailable(format!("Failed to build BERT model: {}", e))
            })?;

            Ok(Self {
                model,
                tokenizer,
                device,
            })
        }

        /// Mean-pooled, unit-length sentence embedding
        pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let encoding = self.tokenizer.encode(text, true).map_err(model_err)?;
            let mut ids = encoding.get_ids().to_vec();
            ids.truncate(MAX_TOKENS);
            if ids.is_empty() {
                return Err(ArchRuleError::embedding("text produced no tokens"));
            }

            let token_ids = Tensor::new(ids.as_slice(), &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(model_err)?;
            let token_type_ids = token_ids.zeros_like().map_err(model_err)?;

            let hidden = self
                .model
                .forward(&token_ids, &token_type_ids)
                .map_err(model_err)?;
            let (_batch, n_tokens, _hidden) = hidden.dims3().map_err(model_err)?;

            let pooled = (hidden.sum(1).map_err(model_err)? / n_tokens as f64)
                .and_then(|t| t.squeeze(0))
                .map_err(model_err)?;
            let norm = pooled
                .sqr()
                .and_then(|t| t.sum_all())
                .and_then(|t| t.sqrt())
                .and_then(|t| t.to_scalar::<f32>())
                .map_err(model_err)?;

            let mut vector = pooled.to_vec1::<f32>().map_err(model_err)?;
            if norm > f32::EPSILON {
                for v in &mut vector {
                    *v /= norm;
                }
            }
            Ok(vector)
        }
    }
}
