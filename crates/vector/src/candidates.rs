use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{GuidanceStore, ScopeFilter};
use crate::types::GuidanceRecord;

/// Result of a candidate fetch; `degraded` carries the store error, if any
#[derive(Debug, Clone, Default)]
pub struct CandidateFetch {
    pub records: Vec<GuidanceRecord>,
    pub degraded: Option<String>,
}

/// Scope-filtered, never-failing view over a store
#[derive(Clone)]
pub struct CandidateAccessor {
    store: Arc<dyn GuidanceStore>,
}

impl CandidateAccessor {
    pub fn new(store: Arc<dyn GuidanceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GuidanceStore> {
        &self.store
    }

    /// Records with an embedding visible under `scope`
    ///
    /// Without a scope only global records are returned. Store failures
    /// yield an empty, degraded result.
    pub async fn fetch(&self, scope: Option<&str>) -> CandidateFetch {
        let filter = ScopeFilter::from_scope(scope);
        match self.store.fetch_candidates(&filter).await {
            Ok(records) => {
                debug!("{} candidates for scope {}", records.len(), filter);
                CandidateFetch {
                    records,
                    degraded: None,
                }
            }
            Err(e) => {
                warn!("Candidate fetch failed for scope {}: {}", filter, e);
                CandidateFetch {
                    records: Vec::new(),
                    degraded: Some(e.to_string()),
                }
            }
        }
    }
}
