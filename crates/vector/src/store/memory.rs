use archrule_common::{ArchRuleError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{GuidanceStore, ScopeFilter};
use crate::types::GuidanceRecord;

/// In-process store
///
/// Keeps insertion order, which is the order candidates are returned in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<GuidanceRecord>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<GuidanceRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            offline: AtomicBool::new(false),
        }
    }

    /// Insert or replace by id
    pub async fn upsert(&self, record: GuidanceRecord) {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub async fn get(&self, record_id: &str) -> Option<GuidanceRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == record_id)
            .cloned()
    }

    /// Make every call fail as unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ArchRuleError::store_unavailable("memory store is offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GuidanceStore for MemoryStore {
    async fn fetch_candidates(&self, filter: &ScopeFilter) -> Result<Vec<GuidanceRecord>> {
        self.check_online()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.embedding.is_some() && filter.admits(r))
            .cloned()
            .collect())
    }

    async fn mark_retrieved(&self, record_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check_online()?;
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| ArchRuleError::tracking(record_id, "no such record"))?;
        record.last_retrieved = Some(at);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        self.check_online()?;
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        MemoryStore::with_records(vec![
            GuidanceRecord::new("1", "A", "global", "g").with_embedding(&[1.0]),
            GuidanceRecord::new("2", "B", "team", "g")
                .with_embedding(&[1.0])
                .with_project("team-a"),
            GuidanceRecord::new("3", "C", "no vector", "g"),
        ])
    }

    #[tokio::test]
    async fn test_fetch_requires_embedding_and_scope() {
        let store = seeded();

        let global = store.fetch_candidates(&ScopeFilter::GlobalOnly).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].id, "1");

        let team = store
            .fetch_candidates(&ScopeFilter::GlobalOr("team-a".into()))
            .await
            .unwrap();
        assert_eq!(team.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_mark_retrieved() {
        let store = seeded();
        let now = Utc::now();

        store.mark_retrieved("2", now).await.unwrap();
        assert_eq!(store.get("2").await.unwrap().last_retrieved, Some(now));
        assert!(store.mark_retrieved("missing", now).await.is_err());
    }

    #[tokio::test]
    async fn test_offline() {
        let store = seeded();
        store.set_offline(true);
        let err = store.fetch_candidates(&ScopeFilter::GlobalOnly).await.unwrap_err();
        assert!(matches!(err, ArchRuleError::StoreUnavailable(_)));

        store.set_offline(false);
        store.upsert(GuidanceRecord::new("1", "A", "renamed", "g")).await;
        assert_eq!(store.get("1").await.unwrap().title, "renamed");
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
