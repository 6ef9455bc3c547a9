//! In-memory `RecordStore` for tests and single-process deployments.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rrad_core::{OrderRecord, PurgeCounts, RefundRecord, ReturnReasonRecord, Shop, SyncStatus};
use tokio::sync::RwLock;

use crate::{RecordStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    shops: HashMap<String, Shop>,
    orders: HashMap<String, OrderRecord>,
    refunds: HashMap<String, RefundRecord>,
    return_reasons: HashMap<String, ReturnReasonRecord>,
}

/// All tables live behind one lock, so every method is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refund_count(&self, shop: &str) -> usize {
        self.tables
            .read()
            .await
            .refunds
            .values()
            .filter(|r| r.shop == shop)
            .count()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn shop(&self, shop: &str) -> Result<Option<Shop>, StoreError> {
        Ok(self.tables.read().await.shops.get(shop).cloned())
    }

    async fn ensure_shop(&self, shop: &str) -> Result<Shop, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .shops
            .entry(shop.to_string())
            .or_insert_with(|| Shop::new(shop))
            .clone())
    }

    async fn shops_awaiting_poll(&self) -> Result<Vec<Shop>, StoreError> {
        let tables = self.tables.read().await;
        let mut shops: Vec<Shop> = tables
            .shops
            .values()
            .filter(|s| s.awaiting_poll())
            .cloned()
            .collect();
        shops.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(shops)
    }

    async fn try_begin_sync(&self, shop: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .shops
            .entry(shop.to_string())
            .or_insert_with(|| Shop::new(shop));
        if row.sync_status == SyncStatus::Running {
            return Ok(false);
        }
        row.sync_status = SyncStatus::Running;
        row.sync_operation_id = None;
        Ok(true)
    }

    async fn record_sync_operation(&self, shop: &str, operation_id: &str) -> Result<(), StoreError> {
        if let Some(row) = self.tables.write().await.shops.get_mut(shop) {
            row.sync_operation_id = Some(operation_id.to_string());
        }
        Ok(())
    }

    async fn mark_sync_failed(&self, shop: &str) -> Result<(), StoreError> {
        if let Some(row) = self.tables.write().await.shops.get_mut(shop) {
            row.sync_status = SyncStatus::Failed;
            row.sync_operation_id = None;
        }
        Ok(())
    }

    async fn mark_sync_completed(
        &self,
        shop: &str,
        completed_at: DateTime<Utc>,
        currency: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(row) = self.tables.write().await.shops.get_mut(shop) {
            row.sync_status = SyncStatus::Completed;
            row.sync_operation_id = None;
            row.last_sync_at = Some(completed_at);
            if let Some(currency) = currency {
                row.currency = currency.to_string();
            }
        }
        Ok(())
    }

    async fn mark_operation_finished(&self, shop: &str, operation_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.shops.get_mut(shop) {
            Some(row) if row.sync_operation_id.as_deref() == Some(operation_id) => {
                row.sync_status = SyncStatus::Completed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_order(&self, order: &OrderRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .orders
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn order(&self, shop: &str, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .get(order_id)
            .filter(|o| o.shop == shop)
            .cloned())
    }

    async fn update_order_financial_status(
        &self,
        shop: &str,
        order_id: &str,
        financial_status: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(order_id) {
            Some(order) if order.shop == shop => {
                order.financial_status = financial_status.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn orders_since(&self, shop: &str, since: DateTime<Utc>) -> Result<Vec<OrderRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<OrderRecord> = tables
            .orders
            .values()
            .filter(|o| o.shop == shop && o.order_date >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.order_date.cmp(&b.order_date).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn upsert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .refunds
            .insert(refund.id.clone(), refund.clone());
        Ok(())
    }

    async fn refund(&self, shop: &str, refund_id: &str) -> Result<Option<RefundRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .refunds
            .get(refund_id)
            .filter(|r| r.shop == shop)
            .cloned())
    }

    async fn refunds_since(&self, shop: &str, since: DateTime<Utc>) -> Result<Vec<RefundRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<RefundRecord> = tables
            .refunds
            .values()
            .filter(|r| r.shop == shop && r.refund_date >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.refund_date.cmp(&b.refund_date).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn upsert_return_reason(&self, record: &ReturnReasonRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .return_reasons
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn return_reasons_since(
        &self,
        shop: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReturnReasonRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<ReturnReasonRecord> = tables
            .return_reasons
            .values()
            .filter(|r| r.shop == shop && r.created_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn purge_shop(&self, shop: &str) -> Result<PurgeCounts, StoreError> {
        let mut tables = self.tables.write().await;
        let mut counts = PurgeCounts::default();

        let before = tables.return_reasons.len();
        tables.return_reasons.retain(|_, r| r.shop != shop);
        counts.return_reasons = (before - tables.return_reasons.len()) as u64;

        let before = tables.refunds.len();
        tables.refunds.retain(|_, r| r.shop != shop);
        counts.refunds = (before - tables.refunds.len()) as u64;

        let before = tables.orders.len();
        tables.orders.retain(|_, o| o.shop != shop);
        counts.orders = (before - tables.orders.len()) as u64;

        counts.shops = u64::from(tables.shops.remove(shop).is_some());
        Ok(counts)
    }

    async fn redact_orders(&self, shop: &str, order_ids: &[String]) -> Result<PurgeCounts, StoreError> {
        let targets: HashSet<&str> = order_ids.iter().map(String::as_str).collect();
        let mut tables = self.tables.write().await;
        let mut counts = PurgeCounts::default();

        let before = tables.return_reasons.len();
        tables
            .return_reasons
            .retain(|_, r| !(r.shop == shop && targets.contains(r.order_id.as_str())));
        counts.return_reasons = (before - tables.return_reasons.len()) as u64;

        let before = tables.refunds.len();
        tables
            .refunds
            .retain(|_, r| !(r.shop == shop && targets.contains(r.order_id.as_str())));
        counts.refunds = (before - tables.refunds.len()) as u64;

        let before = tables.orders.len();
        tables
            .orders
            .retain(|_, o| !(o.shop == shop && targets.contains(o.id.as_str())));
        counts.orders = (before - tables.orders.len()) as u64;

        Ok(counts)
    }
}
