use archrule_common::{ArchRuleError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{GuidanceStore, ScopeFilter};
use crate::types::GuidanceRecord;

/// Stand-in for a store whose connection settings are missing
///
/// Every call fails as unavailable, so searches degrade to empty results.
#[derive(Debug, Clone)]
pub struct UnconfiguredStore {
    reason: String,
}

impl UnconfiguredStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable(&self) -> ArchRuleError {
        ArchRuleError::store_unavailable(self.reason.clone())
    }
}

#[async_trait]
impl GuidanceStore for UnconfiguredStore {
    async fn fetch_candidates(&self, _filter: &ScopeFilter) -> Result<Vec<GuidanceRecord>> {
        Err(self.unavailable())
    }

    async fn mark_retrieved(&self, _record_id: &str, _at: DateTime<Utc>) -> Result<()> {
        Err(self.unavailable())
    }

    async fn count(&self) -> Result<usize> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_call_is_unavailable() {
        let store = UnconfiguredStore::new("store.url is not set");

        let err = store.fetch_candidates(&ScopeFilter::GlobalOnly).await.unwrap_err();
        assert!(err.is_unavailability());
        assert!(err.to_string().contains("store.url is not set"));
        assert!(store.mark_retrieved("1", Utc::now()).await.is_err());
        assert!(store.count().await.is_err());
    }
}
