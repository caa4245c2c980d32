use archrule_common::{ArchRuleError, BackendKind, Result};
use async_trait::async_trait;

/// Common trait for embedding backends
///
/// Every implementation produces vectors of exactly `dimensions()` values.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Model identifier sent to (or loaded by) the backend
    fn model(&self) -> &str;

    /// Output vector length
    fn dimensions(&self) -> usize;

    /// Cheap connectivity/credential check
    async fn probe(&self) -> Result<()>;

    /// Generate embedding for text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Whether `embed_batch` is a native call
    fn supports_batch(&self) -> bool {
        false
    }

    /// Most texts accepted by one `embed_batch` call
    fn max_batch_size(&self) -> usize {
        1
    }

    /// Native batch call. `Ok` holds one vector per input, in input order;
    /// `Err` means the batch as a whole failed.
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ArchRuleError::batch_embedding(format!(
            "{} backend does not support batch requests",
            self.kind()
        )))
    }
}
