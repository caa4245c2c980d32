use archrule_common::{AppConfig, Result, SearchConfig};
use archrule_embedding::{EmbeddingManager, ProviderInfo};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::candidates::CandidateAccessor;
use crate::ranker::Ranker;
use crate::store::{GuidanceStore, SupabaseStore, UnconfiguredStore};
use crate::tracker::RetrievalTracker;
use crate::types::ScoredGuidance;

/// Pipeline stage a search stopped at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStage {
    Embedding,
    Fetching,
    /// Ranked and queued for tracking
    Done,
}

/// Search results with how far the pipeline got
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub results: Vec<ScoredGuidance>,
    pub stage: SearchStage,
    /// Why the search short-circuited, if it did
    pub degraded: Option<String>,
    pub candidates: usize,
    pub skipped: usize,
}

impl SearchReport {
    fn stopped(stage: SearchStage, reason: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            stage,
            degraded: Some(reason.into()),
            candidates: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded => f.write_str("degraded"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub embedding: ProviderInfo,
    pub store: HealthStatus,
    pub store_error: Option<String>,
    pub records: Option<usize>,
}

/// Semantic guidance search
///
/// `search` never fails: unavailable dependencies yield fewer or no results.
pub struct GuidanceSearchEngine {
    embeddings: Arc<EmbeddingManager>,
    candidates: CandidateAccessor,
    ranker: Ranker,
    tracker: RetrievalTracker,
}

impl GuidanceSearchEngine {
    /// Spawns the retrieval tracker, so call inside a tokio runtime
    pub fn new(
        embeddings: Arc<EmbeddingManager>,
        store: Arc<dyn GuidanceStore>,
        search: &SearchConfig,
    ) -> Self {
        Self {
            embeddings,
            candidates: CandidateAccessor::new(store.clone()),
            ranker: Ranker::new().with_min_similarity(search.min_similarity),
            tracker: RetrievalTracker::spawn(store),
        }
    }

    /// Engine over the configured Supabase store and embedding backends
    ///
    /// Missing store credentials do not fail construction; searches then
    /// come back empty and degraded.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store: Arc<dyn GuidanceStore> = if config.store.is_configured() {
            Arc::new(SupabaseStore::new(&config.store)?)
        } else {
            warn!("Supabase credentials not found, guidance search will return no results");
            Arc::new(UnconfiguredStore::new(
                "store.url and store.api_key must both be set",
            ))
        };
        let embeddings = Arc::new(EmbeddingManager::new(config.embedding.clone()));
        Ok(Self::new(embeddings, store, &config.search))
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingManager> {
        &self.embeddings
    }

    pub fn tracker(&self) -> &RetrievalTracker {
        &self.tracker
    }

    /// Top `limit` records for `query`, visible under `scope`
    pub async fn search(&self, query: &str, scope: Option<&str>, limit: usize) -> Vec<ScoredGuidance> {
        self.search_detailed(query, scope, limit).await.results
    }

    pub async fn search_detailed(&self, query: &str, scope: Option<&str>, limit: usize) -> SearchReport {
        debug!("Searching for: {} (scope={:?}, limit={})", query, scope, limit);

        if query.trim().is_empty() {
            return SearchReport::stopped(SearchStage::Embedding, "query is blank");
        }
        if limit == 0 {
            return SearchReport {
                results: Vec::new(),
                stage: SearchStage::Done,
                degraded: None,
                candidates: 0,
                skipped: 0,
            };
        }

        let Some(query_vector) = self.embeddings.embed(query).await else {
            warn!("Vector search unavailable, returning empty results");
            return SearchReport::stopped(SearchStage::Embedding, "no embedding for query");
        };

        let fetch = self.candidates.fetch(scope).await;
        if let Some(reason) = fetch.degraded {
            return SearchReport::stopped(SearchStage::Fetching, reason);
        }
        let total = fetch.records.len();

        let ranking = self.ranker.rank(&query_vector, fetch.records, limit);

        let ids: Vec<String> = ranking.results.iter().map(|r| r.id.clone()).collect();
        self.tracker.track(ids, Utc::now());

        info!(
            "Search completed - {} results (from {} candidates, {} skipped)",
            ranking.results.len(),
            total,
            ranking.skipped
        );

        SearchReport {
            results: ranking.results,
            stage: SearchStage::Done,
            degraded: None,
            candidates: total,
            skipped: ranking.skipped,
        }
    }

    /// Status of the embedding backend and the store
    pub async fn health_check(&self) -> HealthReport {
        let embedding = self.embeddings.provider_info().await;
        let (store, records, store_error) = match self.candidates.store().count().await {
            Ok(count) => (HealthStatus::Healthy, Some(count), None),
            Err(e) => (HealthStatus::Degraded, None, Some(e.to_string())),
        };

        let status = if embedding.available && store == HealthStatus::Healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            embedding,
            store,
            store_error,
            records,
        }
    }

    /// Finish pending retrieval updates
    pub async fn shutdown(&self) {
        self.tracker.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::GuidanceRecord;
    use archrule_common::{BackendKind, BackendMode, EmbeddingConfig};
    use archrule_embedding::mock::{MockBackend, MockFactory};

    fn engine(backend: Option<Arc<MockBackend>>, store: Arc<MemoryStore>) -> GuidanceSearchEngine {
        let mut config = EmbeddingConfig::default();
        config.backend = BackendMode::Explicit(BackendKind::OpenAi);
        config.dimensions = 2;

        let mut factory = MockFactory::new();
        if let Some(backend) = backend {
            factory = factory.with_backend(backend);
        }
        let manager = EmbeddingManager::with_factory(config, Arc::new(factory));
        GuidanceSearchEngine::new(Arc::new(manager), store, &SearchConfig::default())
    }

    fn backend() -> Arc<MockBackend> {
        Arc::new(MockBackend::new(BackendKind::OpenAi, 2).with_vector("layers", vec![1.0, 0.0]))
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_records(vec![
            GuidanceRecord::new("1", "ARCH-001", "Layers", "g").with_embedding(&[1.0, 0.0]),
            GuidanceRecord::new("2", "ARCH-002", "Other", "g").with_embedding(&[0.0, 1.0]),
        ]))
    }

    #[tokio::test]
    async fn test_search_and_track() {
        let store = store();
        let engine = engine(Some(backend()), store.clone());

        let report = engine.search_detailed("layers", None, 1).await;
        assert_eq!(report.stage, SearchStage::Done);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].rule_id, "ARCH-001");

        engine.tracker().flush().await;
        assert!(store.get("1").await.unwrap().last_retrieved.is_some());
        assert!(store.get("2").await.unwrap().last_retrieved.is_none());
    }

    #[tokio::test]
    async fn test_blank_query_skips_backend() {
        let mock = backend();
        let engine = engine(Some(mock.clone()), store());

        let report = engine.search_detailed("   ", None, 5).await;
        assert!(report.results.is_empty());
        assert_eq!(report.stage, SearchStage::Embedding);
        assert_eq!(report.degraded.as_deref(), Some("query is blank"));
        assert_eq!(mock.item_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_backend() {
        let engine = engine(None, store());
        let report = engine.search_detailed("layers", None, 5).await;
        assert!(report.results.is_empty());
        assert_eq!(report.stage, SearchStage::Embedding);
    }

    #[tokio::test]
    async fn test_store_down() {
        let store = store();
        store.set_offline(true);
        let engine = engine(Some(backend()), store);

        let report = engine.search_detailed("layers", None, 5).await;
        assert!(report.results.is_empty());
        assert_eq!(report.stage, SearchStage::Fetching);
        assert!(report.degraded.is_some());
    }

    #[tokio::test]
    async fn test_unconfigured_store_degrades() {
        let mut config = AppConfig::default();
        config.embedding.backend = BackendMode::Explicit(BackendKind::OpenAi);
        let engine = GuidanceSearchEngine::from_config(&config).unwrap();

        assert!(engine.search("layered architecture", None, 5).await.is_empty());

        let health = engine.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.store, HealthStatus::Degraded);
        assert!(health.store_error.unwrap().contains("store.url"));
        engine.shutdown().await;

        let engine = GuidanceSearchEngine::new(
            Arc::new(EmbeddingManager::with_factory(
                {
                    let mut embedding = EmbeddingConfig::default();
                    embedding.backend = BackendMode::Explicit(BackendKind::OpenAi);
                    embedding.dimensions = 2;
                    embedding
                },
                Arc::new(MockFactory::new().with_backend(backend())),
            )),
            Arc::new(UnconfiguredStore::new("store.url is not set")),
            &SearchConfig::default(),
        );
        let report = engine.search_detailed("layers", None, 5).await;
        assert!(report.results.is_empty());
        assert_eq!(report.stage, SearchStage::Fetching);
        assert!(report.degraded.unwrap().contains("store.url is not set"));
    }

    #[test]
    fn test_stage_names() {
        let stages = [SearchStage::Embedding, SearchStage::Fetching, SearchStage::Done];
        let names: Vec<_> = stages
            .iter()
            .map(|s| serde_json::to_value(s).unwrap())
            .collect();
        assert_eq!(names, vec!["embedding", "fetching", "done"]);
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = store();
        let engine = engine(Some(backend()), store.clone());

        let health = engine.health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.records, Some(2));
        assert_eq!(health.embedding.backend, Some(BackendKind::OpenAi));

        store.set_offline(true);
        let health = engine.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.store, HealthStatus::Degraded);
        assert!(health.store_error.is_some());
    }
}
