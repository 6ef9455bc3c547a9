//! Durable record storage + bulk export download utilities for Refund Radar.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rrad_core::{OrderRecord, PurgeCounts, RefundRecord, ReturnReasonRecord, Shop};
use thiserror::Error;

mod http;
mod memory;
mod postgres;

pub use http::{
    classify_reqwest_error, classify_status, ExportDownloader, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

pub const CRATE_NAME: &str = "rrad-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt {column} value in store: {value}")]
    Corrupt { column: &'static str, value: String },
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

/// Keyed storage for the four entity kinds, exclusively partitioned by shop.
///
/// Every write is an upsert on the origin-assigned id so that the bulk sync and
/// the webhook path can write concurrently without coordination. The one
/// exception is [`RecordStore::try_begin_sync`], which must be a single atomic
/// compare-and-set.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn shop(&self, shop: &str) -> Result<Option<Shop>, StoreError>;

    /// Fetch the shop, creating a `pending` row for a previously unseen one.
    async fn ensure_shop(&self, shop: &str) -> Result<Shop, StoreError>;

    async fn shops_awaiting_poll(&self) -> Result<Vec<Shop>, StoreError>;

    /// Move the shop to `running` unless it is already `running`.
    ///
    /// Returns `false` without side effects when another sync holds the slot.
    /// Clears any stale operation id on success.
    async fn try_begin_sync(&self, shop: &str) -> Result<bool, StoreError>;

    async fn record_sync_operation(&self, shop: &str, operation_id: &str) -> Result<(), StoreError>;

    /// Terminal failure: status `failed`, operation id cleared, `last_sync_at` untouched.
    async fn mark_sync_failed(&self, shop: &str) -> Result<(), StoreError>;

    /// Successful ingestion: status `completed`, operation id cleared.
    async fn mark_sync_completed(
        &self,
        shop: &str,
        completed_at: DateTime<Utc>,
        currency: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Upstream finished but nothing was ingested yet: status `completed`, operation id kept.
    ///
    /// Only applies when `operation_id` is the one the shop currently tracks.
    async fn mark_operation_finished(&self, shop: &str, operation_id: &str) -> Result<bool, StoreError>;

    async fn upsert_order(&self, order: &OrderRecord) -> Result<(), StoreError>;
    async fn order(&self, shop: &str, order_id: &str) -> Result<Option<OrderRecord>, StoreError>;

    /// Returns `false` when the order is not known locally.
    async fn update_order_financial_status(
        &self,
        shop: &str,
        order_id: &str,
        financial_status: &str,
    ) -> Result<bool, StoreError>;

    async fn orders_since(&self, shop: &str, since: DateTime<Utc>) -> Result<Vec<OrderRecord>, StoreError>;

    async fn upsert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError>;
    async fn refund(&self, shop: &str, refund_id: &str) -> Result<Option<RefundRecord>, StoreError>;
    async fn refunds_since(&self, shop: &str, since: DateTime<Utc>) -> Result<Vec<RefundRecord>, StoreError>;

    async fn upsert_return_reason(&self, record: &ReturnReasonRecord) -> Result<(), StoreError>;
    async fn return_reasons_since(
        &self,
        shop: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReturnReasonRecord>, StoreError>;

    /// Hard-delete the shop and every record it owns.
    async fn purge_shop(&self, shop: &str) -> Result<PurgeCounts, StoreError>;

    /// Hard-delete orders, refunds and return reasons tied to the given order ids.
    async fn redact_orders(&self, shop: &str, order_ids: &[String]) -> Result<PurgeCounts, StoreError>;
}

/// Open the store named by a database url: `memory://` or `postgres://…`.
pub async fn connect_store(database_url: &str) -> Result<Arc<dyn RecordStore>, StoreError> {
    if database_url.starts_with("memory:") {
        return Ok(Arc::new(MemoryRecordStore::new()));
    }
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let store = PgRecordStore::connect(database_url).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::UnsupportedUrl(database_url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_url_opens_memory_store() {
        let store = connect_store("memory://").await.expect("memory store");
        assert!(store.shop("nobody.myshopify.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = connect_store("mysql://localhost/db").await.err().expect("error");
        assert!(matches!(err, StoreError::UnsupportedUrl(_)));
    }
}
