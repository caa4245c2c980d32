//! Guidance record storage

mod memory;
mod supabase;
mod unconfigured;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;
pub use unconfigured::UnconfiguredStore;

use archrule_common::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::types::GuidanceRecord;

/// Which records a query may see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Only records without a scope
    GlobalOnly,
    /// Global records plus those of the named scope
    GlobalOr(String),
}

impl ScopeFilter {
    /// Blank scopes count as "no scope"
    pub fn from_scope(scope: Option<&str>) -> Self {
        match scope.map(str::trim) {
            Some(s) if !s.is_empty() => Self::GlobalOr(s.to_string()),
            _ => Self::GlobalOnly,
        }
    }

    pub fn admits(&self, record: &GuidanceRecord) -> bool {
        match (self, record.project_id.as_deref()) {
            (_, None) => true,
            (Self::GlobalOnly, Some(_)) => false,
            (Self::GlobalOr(scope), Some(project)) => scope == project,
        }
    }
}

impl fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalOnly => f.write_str("global"),
            Self::GlobalOr(scope) => write!(f, "global+{}", scope),
        }
    }
}

/// Persistent record store
#[async_trait]
pub trait GuidanceStore: Send + Sync {
    /// Records visible under `filter` that carry an embedding
    async fn fetch_candidates(&self, filter: &ScopeFilter) -> Result<Vec<GuidanceRecord>>;

    /// Stamp `last_retrieved` on one record
    async fn mark_retrieved(&self, record_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Total record count
    async fn count(&self) -> Result<usize>;
}
