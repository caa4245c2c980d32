//! ArchRule guidance retrieval
//!
//! Scope-filtered candidate fetch, cosine ranking and best-effort retrieval
//! tracking on top of the embedding manager.

mod candidates;
mod engine;
mod ranker;
mod similarity;
pub mod store;
mod tracker;
mod types;

pub use candidates::{CandidateAccessor, CandidateFetch};
pub use engine::{GuidanceSearchEngine, HealthReport, HealthStatus, SearchReport, SearchStage};
pub use ranker::{parse_embedding, Ranker, Ranking};
pub use similarity::cosine_similarity;
pub use store::{GuidanceStore, MemoryStore, ScopeFilter, SupabaseStore};
pub use tracker::{RetrievalTracker, TrackerStats};
pub use types::{GuidanceRecord, ScoredGuidance};
