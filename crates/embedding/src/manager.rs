//! Backend selection and the degrade-tolerant embedding contract
//!
//! The manager owns one backend for the lifetime of the process. Selection
//! (construction + probe) runs inside a `OnceCell`, so concurrent first
//! callers share a single attempt and its outcome, "nothing available"
//! included, is never revisited.
//!
//! Batch calls never lose positional correspondence: a failed native batch
//! degrades to one call per item, and an item that still fails becomes a
//! zero vector.

use archrule_common::{ArchRuleError, BackendKind, BackendMode, EmbeddingConfig, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::backend::EmbeddingBackend;
use crate::factory::{BackendFactory, DefaultBackendFactory};
use crate::text::zero_vector;

/// Snapshot of the selected backend for status output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub available: bool,
    pub mode: String,
    pub backend: Option<BackendKind>,
    pub model: Option<String>,
    pub dimensions: usize,
}

pub struct EmbeddingManager {
    config: EmbeddingConfig,
    factory: Arc<dyn BackendFactory>,
    selected: OnceCell<Option<Arc<dyn EmbeddingBackend>>>,
    call_timeout: Duration,
    probe_timeout: Duration,
}

impl EmbeddingManager {
    /// Manager over the real backends
    pub fn new(config: EmbeddingConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultBackendFactory))
    }

    pub fn with_factory(config: EmbeddingConfig, factory: Arc<dyn BackendFactory>) -> Self {
        let call_timeout = config.timeout();
        let probe_timeout = config.probe_timeout();
        Self {
            config,
            factory,
            selected: OnceCell::new(),
            call_timeout,
            probe_timeout,
        }
    }

    /// Override the per-call bound (probe included)
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self.probe_timeout = timeout;
        self
    }

    /// Configured output dimensionality
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn mode(&self) -> BackendMode {
        self.config.backend
    }

    /// Selected backend, running selection on first use
    pub async fn backend(&self) -> Option<Arc<dyn EmbeddingBackend>> {
        self.selected.get_or_init(|| self.select()).await.clone()
    }

    /// Kind of the selected backend, if any
    pub async fn selected_backend(&self) -> Option<BackendKind> {
        self.backend().await.map(|b| b.kind())
    }

    pub async fn is_available(&self) -> bool {
        self.backend().await.is_some()
    }

    pub async fn provider_info(&self) -> ProviderInfo {
        let backend = self.backend().await;
        ProviderInfo {
            available: backend.is_some(),
            mode: self.config.backend.to_string(),
            backend: backend.as_ref().map(|b| b.kind()),
            model: backend.as_ref().map(|b| b.model().to_string()),
            dimensions: self.config.dimensions,
        }
    }

    async fn select(&self) -> Option<Arc<dyn EmbeddingBackend>> {
        let candidates = self.config.candidates();
        let auto = matches!(self.config.backend, BackendMode::Auto);

        for (position, kind) in candidates.iter().copied().enumerate() {
            let backend = match self.factory.create(kind, &self.config) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!("Embedding backend {} could not be created: {}", kind, e);
                    continue;
                }
            };

            match bounded(self.probe_timeout, backend.probe()).await {
                Ok(()) => {
                    if auto && position > 0 {
                        warn!(
                            "Embedding backend {} selected as fallback; vectors from other backends may not be comparable",
                            kind
                        );
                    }
                    info!(
                        "Embedding backend selected: {} ({}, {} dims)",
                        kind,
                        backend.model(),
                        self.config.dimensions
                    );
                    return Some(backend);
                }
                Err(e) => warn!("Embedding backend {} unavailable: {}", kind, e),
            }
        }

        error!(
            "No embedding backend available (mode: {}, tried: {:?})",
            self.config.backend, candidates
        );
        None
    }

    /// Embed one text; `None` when no backend is available or the call fails
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let backend = self.backend().await?;
        self.embed_with(backend.as_ref(), text).await
    }

    /// Embed many texts; output length always equals input length
    ///
    /// `None` only when no backend is available.
    pub async fn embed_batch(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        let backend = self.backend().await?;
        let chunk_size = if backend.supports_batch() {
            backend.max_batch_size().max(1)
        } else {
            texts.len().max(1)
        };

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(chunk_size) {
            vectors.extend(self.embed_chunk(backend.as_ref(), chunk).await);
        }
        Some(vectors)
    }

    async fn embed_chunk(&self, backend: &dyn EmbeddingBackend, chunk: &[String]) -> Vec<Vec<f32>> {
        if backend.supports_batch() {
            match bounded(self.call_timeout, backend.embed_batch(chunk)).await {
                Ok(vectors) if self.batch_is_valid(&vectors, chunk.len()) => return vectors,
                Ok(vectors) => warn!(
                    "Batch of {} returned {} malformed results, embedding items one by one",
                    chunk.len(),
                    vectors.len()
                ),
                Err(e) => warn!(
                    "Batch embedding of {} texts failed, embedding items one by one: {}",
                    chunk.len(),
                    e
                ),
            }
        }

        let mut vectors = Vec::with_capacity(chunk.len());
        for (index, text) in chunk.iter().enumerate() {
            let vector = match self.embed_with(backend, text).await {
                Some(vector) => vector,
                None => {
                    debug!("Substituting zero vector for item {}", index);
                    zero_vector(self.config.dimensions)
                }
            };
            vectors.push(vector);
        }
        vectors
    }

    async fn embed_with(&self, backend: &dyn EmbeddingBackend, text: &str) -> Option<Vec<f32>> {
        match bounded(self.call_timeout, backend.embed(text)).await {
            Ok(vector) if vector.len() == self.config.dimensions => Some(vector),
            Ok(vector) => {
                warn!("Embedding has {} dimensions, expected {}", vector.len(), self.config.dimensions);
                None
            }
            Err(e) => {
                warn!("Embedding failed: {}", e);
                None
            }
        }
    }

    fn batch_is_valid(&self, vectors: &[Vec<f32>], expected: usize) -> bool {
        vectors.len() == expected && vectors.iter().all(|v| v.len() == self.config.dimensions)
    }
}

/// Run `fut` under `limit`; elapsing counts as a failure
async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ArchRuleError::Timeout(limit))?
}
