/// ArchRule error types
///
/// None of these cross the search boundary; the engine degrades on each of
/// them and logs instead.
#[derive(Debug, thiserror::Error)]
pub enum ArchRuleError {
    /// No credentials, no connectivity, or a failed probe
    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A single text could not be embedded
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// A whole native batch call failed
    #[error("Batch embedding failed: {0}")]
    BatchEmbeddingFailed(String),

    /// A persisted embedding could not be parsed
    #[error("Malformed stored embedding for record {record_id}: {reason}")]
    MalformedEmbedding { record_id: String, reason: String },

    /// Candidate store could not be reached or queried
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A last-retrieved stamp could not be written
    #[error("Failed to track retrieval of record {record_id}: {reason}")]
    TrackingFailed { record_id: String, reason: String },

    /// A bounded call ran out of time
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General error (anyhow integration)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArchRuleError {
    /// Create backend unavailable error
    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create single embedding error
    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        Self::EmbeddingFailed(msg.into())
    }

    /// Create batch embedding error
    pub fn batch_embedding<S: Into<String>>(msg: S) -> Self {
        Self::BatchEmbeddingFailed(msg.into())
    }

    /// Create malformed embedding error
    pub fn malformed_embedding(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEmbedding {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }

    /// Create store unavailable error
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create tracking error
    pub fn tracking(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TrackingFailed {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }

    /// Create config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Whether the error means the dependency is unreachable rather than
    /// that one request was bad
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_)
                | Self::StoreUnavailable(_)
                | Self::Network(_)
                | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for ArchRuleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {}", e))
        } else {
            Self::Network(e.to_string())
        }
    }
}
