//! Per-shop bulk sync state machine.
//!
//! `pending → running → completed | failed`, with `completed → running` and
//! `failed → running` for re-syncs. The only transition that needs atomicity
//! is entering `running`; it is delegated to [`RecordStore::try_begin_sync`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rrad_adapters::{
    order_from_export, refund_from_detail, BulkOperationStatus, BulkStart, CommerceApi,
    ExportOrder, UserError, ORDERS_EXPORT_QUERY,
};
use rrad_core::{Shop, SyncState, DEFAULT_CURRENCY};
use rrad_storage::{ExportDownloader, RecordStore};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::enrich::DetailEnricher;
use crate::jsonl::parse_jsonl;
use crate::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartSyncOutcome {
    Started { operation_id: String },
    /// Another sync holds the slot; nothing was sent upstream.
    AlreadyRunning,
    /// The origin refused the export; the shop is now `failed`.
    Rejected(Vec<UserError>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// No export is being tracked for this shop.
    Idle,
    /// Upstream still working, or finished without a usable result yet.
    Pending(BulkOperationStatus),
    /// The tracked operation is unknown upstream; local state left as is.
    NotFound,
    Failed {
        status: BulkOperationStatus,
        error_code: Option<String>,
    },
    /// Completed with zero objects and no result file.
    Empty,
    Completed(SyncReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub records_parsed: usize,
    pub orders_saved: usize,
    pub orders_skipped: usize,
    pub refund_ids: usize,
    pub refunds_saved: usize,
    pub return_ids: usize,
    pub return_reasons_saved: usize,
    pub currency: String,
}

pub struct BulkSyncOrchestrator {
    store: Arc<dyn RecordStore>,
    downloader: Arc<dyn ExportDownloader>,
    enricher: Arc<DetailEnricher>,
}

impl BulkSyncOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        downloader: Arc<dyn ExportDownloader>,
        enricher: Arc<DetailEnricher>,
    ) -> Self {
        Self {
            store,
            downloader,
            enricher,
        }
    }

    /// Current state; a shop never seen before reports `pending`.
    pub async fn sync_status(&self, shop: &str) -> Result<SyncState, SyncError> {
        Ok(self
            .store
            .shop(shop)
            .await?
            .as_ref()
            .map(SyncState::from)
            .unwrap_or_else(SyncState::pending))
    }

    pub async fn shops_awaiting_poll(&self) -> Result<Vec<Shop>, SyncError> {
        Ok(self.store.shops_awaiting_poll().await?)
    }

    pub async fn start_sync(
        &self,
        shop: &str,
        client: &dyn CommerceApi,
    ) -> Result<StartSyncOutcome, SyncError> {
        let span = info_span!("start_sync", shop = %shop);
        async {
            if !self.store.try_begin_sync(shop).await? {
                info!("sync already in progress");
                return Ok(StartSyncOutcome::AlreadyRunning);
            }

            match client.start_bulk_export(ORDERS_EXPORT_QUERY).await {
                Ok(BulkStart::Accepted(operation)) => {
                    self.store.record_sync_operation(shop, &operation.id).await?;
                    info!(operation_id = %operation.id, "bulk export started");
                    Ok(StartSyncOutcome::Started {
                        operation_id: operation.id,
                    })
                }
                Ok(BulkStart::Rejected(errors)) => {
                    warn!(errors = errors.len(), "bulk export rejected by origin");
                    self.store.mark_sync_failed(shop).await?;
                    Ok(StartSyncOutcome::Rejected(errors))
                }
                Err(err) => {
                    error!(error = %err, "bulk export request failed");
                    self.store.mark_sync_failed(shop).await?;
                    Err(err.into())
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn poll_status(&self, shop: &str, client: &dyn CommerceApi) -> Result<PollOutcome, SyncError> {
        let span = info_span!("poll_sync", shop = %shop);
        async {
            let Some(state) = self.store.shop(shop).await? else {
                return Ok(PollOutcome::Idle);
            };
            let Some(operation_id) = state.sync_operation_id.clone().filter(|_| state.awaiting_poll())
            else {
                return Ok(PollOutcome::Idle);
            };

            let Some(operation) = client.bulk_operation(&operation_id).await? else {
                warn!(operation_id = %operation_id, "tracked bulk operation not found upstream");
                return Ok(PollOutcome::NotFound);
            };

            match operation.status {
                BulkOperationStatus::Completed => match operation.url.as_deref() {
                    Some(url) => {
                        let report = self.process_completed_sync(shop, client, url).await?;
                        Ok(PollOutcome::Completed(report))
                    }
                    None if operation.object_count == Some(0) => {
                        info!("bulk export completed with no objects");
                        self.store
                            .mark_sync_completed(shop, Utc::now(), None)
                            .await?;
                        Ok(PollOutcome::Empty)
                    }
                    None => Ok(PollOutcome::Pending(operation.status)),
                },
                status if status.is_terminal_failure() => {
                    warn!(?status, error_code = ?operation.error_code, "bulk export did not complete");
                    self.store.mark_sync_failed(shop).await?;
                    Ok(PollOutcome::Failed {
                        status,
                        error_code: operation.error_code,
                    })
                }
                status => Ok(PollOutcome::Pending(status)),
            }
        }
        .instrument(span)
        .await
    }

    /// Download, parse and persist a finished export, then mark the shop `completed`.
    ///
    /// Any failure marks the shop `failed` and is returned. Records written
    /// before the failure stay; every write is an idempotent upsert.
    pub async fn process_completed_sync(
        &self,
        shop: &str,
        client: &dyn CommerceApi,
        result_url: &str,
    ) -> Result<SyncReport, SyncError> {
        let span = info_span!("process_completed_sync", shop = %shop);
        match self.ingest(shop, client, result_url).instrument(span).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(shop = %shop, error = %err, "sync processing failed");
                if let Err(mark_err) = self.store.mark_sync_failed(shop).await {
                    error!(shop = %shop, error = %mark_err, "could not record sync failure");
                }
                Err(err)
            }
        }
    }

    async fn ingest(&self, shop: &str, client: &dyn CommerceApi, url: &str) -> Result<SyncReport, SyncError> {
        let text = self.downloader.download(url).await?;
        let records = parse_jsonl(&text);

        let mut report = SyncReport {
            records_parsed: records.len(),
            ..SyncReport::default()
        };

        let mut orders = Vec::new();
        let mut refund_ids = Vec::new();
        let mut seen_refunds = HashSet::new();
        for record in &records {
            match record.kind() {
                Some("Order") => match serde_json::from_value::<ExportOrder>(record.body.clone()) {
                    Ok(order) => {
                        for id in order.refund_ids() {
                            if seen_refunds.insert(id.to_string()) {
                                refund_ids.push(id.to_string());
                            }
                        }
                        orders.push(order);
                    }
                    Err(err) => {
                        warn!(id = %record.id, error = %err, "skipping unreadable order line");
                        report.orders_skipped += 1;
                    }
                },
                Some("Refund") => {
                    if seen_refunds.insert(record.id.clone()) {
                        refund_ids.push(record.id.clone());
                    }
                }
                _ => {}
            }
        }

        let currency = self.resolve_currency(shop, client, &orders).await?;
        report.currency = currency.clone();

        for order in &orders {
            match order_from_export(order, shop, &currency) {
                Some(record) => {
                    self.store.upsert_order(&record).await?;
                    report.orders_saved += 1;
                }
                None => {
                    warn!(id = %order.id, "skipping order without creation time");
                    report.orders_skipped += 1;
                }
            }
        }

        report.refund_ids = refund_ids.len();
        let refund_details = self.enricher.fetch_refund_details(client, &refund_ids).await;

        let mut return_ids = Vec::new();
        let mut return_dates: HashMap<String, DateTime<Utc>> = HashMap::new();
        for detail in &refund_details {
            let Some(record) = refund_from_detail(detail, shop, &currency) else {
                warn!(id = %detail.id, "skipping refund without creation time");
                continue;
            };
            self.store.upsert_refund(&record).await?;
            report.refunds_saved += 1;

            if let Some(return_id) = &record.return_id {
                if !return_dates.contains_key(return_id) {
                    return_ids.push(return_id.clone());
                    return_dates.insert(return_id.clone(), record.refund_date);
                }
            }
        }

        report.return_ids = return_ids.len();
        if !return_ids.is_empty() {
            let return_details = self.enricher.fetch_return_details(client, &return_ids).await;
            report.return_reasons_saved = self
                .enricher
                .save_return_reasons(self.store.as_ref(), shop, &return_details, &return_dates)
                .await?;
        }

        self.store
            .mark_sync_completed(shop, Utc::now(), Some(&currency))
            .await?;

        info!(
            orders = report.orders_saved,
            refunds = report.refunds_saved,
            return_reasons = report.return_reasons_saved,
            "sync completed"
        );
        Ok(report)
    }

    /// First order's currency, then the origin's shop currency, then what we already had.
    async fn resolve_currency(
        &self,
        shop: &str,
        client: &dyn CommerceApi,
        orders: &[ExportOrder],
    ) -> Result<String, SyncError> {
        if let Some(currency) = orders.iter().find_map(|o| o.currency()) {
            return Ok(currency.to_string());
        }

        match client.shop_currency().await {
            Ok(Some(currency)) => return Ok(currency),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "shop currency lookup failed"),
        }

        Ok(self
            .store
            .shop(shop)
            .await?
            .map(|s| s.currency)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()))
    }
}
