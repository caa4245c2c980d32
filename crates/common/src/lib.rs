pub mod config;
pub mod error;
pub mod logger;
pub mod model_manager;

// Re-export commonly used types
pub use config::{
    AppConfig, BackendKind, BackendMode, EmbeddingConfig, LocalModelConfig, OllamaConfig,
    OpenAiConfig, SearchConfig, StoreConfig,
};
pub use error::ArchRuleError;
pub use model_manager::{ModelFiles, ModelManager};
pub type Result<T> = std::result::Result<T, ArchRuleError>;
