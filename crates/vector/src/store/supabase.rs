use archrule_common::{ArchRuleError, Result, StoreConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{GuidanceStore, ScopeFilter};
use crate::types::GuidanceRecord;

const RECORD_COLUMNS: &str =
    "id,rule_id,title,guidance,rationale,category,priority,project_id,embedding,last_retrieved,contexts,tech_stacks,keywords";

/// Supabase table accessed through PostgREST
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    rest_url: String,
    table: String,
    api_key: String,
    client: Client,
}

impl SupabaseStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| ArchRuleError::config("store.url is not set"))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ArchRuleError::config("store.api_key is not set"))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        info!("Guidance store: {} (table {})", url, config.table);

        Ok(Self {
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            table: config.table.clone(),
            api_key,
            client,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.rest_url, self.table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ArchRuleError::store_unavailable(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArchRuleError::store_unavailable(format!(
                "Store returned {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

/// PostgREST filter pairs for a scope
fn scope_params(filter: &ScopeFilter) -> (&'static str, String) {
    match filter {
        ScopeFilter::GlobalOnly => ("project_id", "is.null".to_string()),
        ScopeFilter::GlobalOr(scope) => (
            "or",
            format!("(project_id.is.null,project_id.eq.\"{}\")", quote_value(scope)),
        ),
    }
}

/// Escape a value for a double-quoted PostgREST filter operand
fn quote_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl GuidanceStore for SupabaseStore {
    async fn fetch_candidates(&self, filter: &ScopeFilter) -> Result<Vec<GuidanceRecord>> {
        let (scope_key, scope_value) = scope_params(filter);
        let request = self.client.get(self.table_url()).query(&[
            ("select", RECORD_COLUMNS.to_string()),
            ("embedding", "not.is.null".to_string()),
            (scope_key, scope_value),
        ]);

        let rows: Vec<Value> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| ArchRuleError::store_unavailable(format!("Invalid store response: {}", e)))?;

        let total = rows.len();
        let records: Vec<GuidanceRecord> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<GuidanceRecord>(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Ignoring unreadable store row: {}", e);
                    None
                }
            })
            .collect();

        debug!("Fetched {} of {} rows ({})", records.len(), total, filter);
        Ok(records)
    }

    async fn mark_retrieved(&self, record_id: &str, at: DateTime<Utc>) -> Result<()> {
        let request = self
            .client
            .patch(self.table_url())
            .query(&[("id", format!("eq.{}", record_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "last_retrieved": at.to_rfc3339() }));

        self.send(request)
            .await
            .map_err(|e| ArchRuleError::tracking(record_id, e.to_string()))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let request = self
            .client
            .get(self.table_url())
            .query(&[("select", "id"), ("limit", "1")])
            .header("Prefer", "count=exact");

        let response = self.send(request).await?;
        let range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ArchRuleError::store_unavailable("Missing Content-Range header"))?;

        // "0-0/42" or "*/0"
        range
            .rsplit('/')
            .next()
            .and_then(|total| total.parse().ok())
            .ok_or_else(|| ArchRuleError::store_unavailable(format!("Bad Content-Range: {}", range)))
    }
}
