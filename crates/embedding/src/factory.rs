use archrule_common::{BackendKind, EmbeddingConfig, Result};
use std::sync::Arc;

use crate::backend::EmbeddingBackend;
use crate::local::LocalBackend;
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;

/// Builds backend clients for the manager
///
/// The manager calls this inside its one-time selection, so implementations
/// are invoked at most once per kind per process.
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: BackendKind, config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>>;
}

/// Factory for the real OpenAI, Ollama and local clients
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, kind: BackendKind, config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
        let backend: Arc<dyn EmbeddingBackend> = match kind {
            BackendKind::OpenAi => Arc::new(OpenAiBackend::new(
                &config.openai,
                config.dimensions,
                config.timeout(),
            )?),
            BackendKind::Ollama => Arc::new(OllamaBackend::new(
                &config.ollama,
                config.dimensions,
                config.timeout(),
            )?),
            BackendKind::Local => Arc::new(LocalBackend::new(&config.local, config.dimensions)),
        };
        Ok(backend)
    }
}
