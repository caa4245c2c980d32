//! ArchRule embedding providers
//!
//! Interchangeable text-to-vector backends (OpenAI, Ollama, local model)
//! behind a manager that selects one per process and never raises.

mod backend;
mod factory;
mod local;
mod manager;
mod ollama;
mod openai;
mod text;
mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::EmbeddingBackend;
pub use factory::{BackendFactory, DefaultBackendFactory};
pub use local::LocalBackend;
pub use manager::{EmbeddingManager, ProviderInfo};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use text::{fit_dimensions, normalize_text, zero_vector};
