use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rrad_adapters::{
    return_reasons_from_detail, AdapterError, CommerceApi, MappedReason, ReasonTaxonomy,
    RefundDetail, ReturnDetail,
};
use rrad_storage::{RecordStore, StoreError};
use tracing::{debug, warn};

use crate::batch::{run_in_batches, BatchPolicy};

/// Batched, concurrency-bounded detail fetches plus reason-code mapping.
#[derive(Debug, Clone)]
pub struct DetailEnricher {
    policy: BatchPolicy,
    taxonomy: Arc<ReasonTaxonomy>,
}

impl Default for DetailEnricher {
    fn default() -> Self {
        Self::new(BatchPolicy::default(), ReasonTaxonomy::built_in())
    }
}

impl DetailEnricher {
    pub fn new(policy: BatchPolicy, taxonomy: ReasonTaxonomy) -> Self {
        Self {
            policy,
            taxonomy: Arc::new(taxonomy),
        }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    pub fn taxonomy(&self) -> &ReasonTaxonomy {
        &self.taxonomy
    }

    pub fn map_return_reason(&self, handle: Option<&str>, name: Option<&str>) -> MappedReason {
        self.taxonomy.map_return_reason(handle, name)
    }

    /// Fetch refund details in batches; failed or missing lookups are logged and dropped.
    pub async fn fetch_refund_details(&self, client: &dyn CommerceApi, ids: &[String]) -> Vec<RefundDetail> {
        self.fetch_all("refund", ids, |id| async move { client.refund_detail(&id).await })
            .await
    }

    pub async fn fetch_return_details(&self, client: &dyn CommerceApi, ids: &[String]) -> Vec<ReturnDetail> {
        self.fetch_all("return", ids, |id| async move { client.return_detail(&id).await })
            .await
    }

    /// Single-id path for the webhook ingestor; errors are returned, not swallowed.
    pub async fn fetch_refund_detail(
        &self,
        client: &dyn CommerceApi,
        id: &str,
    ) -> Result<Option<RefundDetail>, AdapterError> {
        client.refund_detail(id).await
    }

    pub async fn fetch_return_detail(
        &self,
        client: &dyn CommerceApi,
        id: &str,
    ) -> Result<Option<ReturnDetail>, AdapterError> {
        client.return_detail(id).await
    }

    /// Map fetched returns to reason rows and upsert them.
    ///
    /// `created_fallbacks` supplies a timestamp (usually the linking refund's
    /// date) for returns whose detail lacks one.
    pub async fn save_return_reasons(
        &self,
        store: &dyn RecordStore,
        shop: &str,
        details: &[ReturnDetail],
        created_fallbacks: &HashMap<String, DateTime<Utc>>,
    ) -> Result<usize, StoreError> {
        let mut saved = 0;
        for detail in details {
            let fallback = created_fallbacks
                .get(&detail.id)
                .copied()
                .unwrap_or_else(Utc::now);
            for row in return_reasons_from_detail(detail, shop, &self.taxonomy, fallback) {
                store.upsert_return_reason(&row).await?;
                saved += 1;
            }
        }
        Ok(saved)
    }

    async fn fetch_all<T, F, Fut>(&self, kind: &'static str, ids: &[String], fetch: F) -> Vec<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Option<T>, AdapterError>>,
    {
        let settled = run_in_batches(ids, &self.policy, fetch).await;
        let mut details = Vec::with_capacity(settled.len());
        for (id, result) in settled {
            match result {
                Ok(Some(detail)) => details.push(detail),
                Ok(None) => debug!(kind, id = %id, "detail not found upstream"),
                Err(err) => warn!(kind, id = %id, error = %err, "dropping failed detail fetch"),
            }
        }
        details
    }
}
