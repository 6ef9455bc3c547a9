//! Read-only report aggregation over stored orders, refunds and return reasons.
//!
//! Money is summed as exact decimals and rounded to cents only when a report
//! row is built.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rrad_core::{
    calendar_date, round_money, OrderRecord, ReasonCategory, RefundRecord, ReturnReasonRecord,
    TrailingDays, DEFAULT_CURRENCY, UNKNOWN_LABEL,
};
use rrad_storage::{RecordStore, StoreError};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

pub const CRATE_NAME: &str = "rrad-reports";

pub const DEFAULT_TOP_PRODUCTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    #[serde(with = "rust_decimal::serde::float")]
    pub gross_sales: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_refunds: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_revenue: Decimal,
    /// Percent of gross sales refunded, 0 when there were no sales.
    #[serde(with = "rust_decimal::serde::float")]
    pub refund_rate: Decimal,
    pub order_count: usize,
    pub refund_count: usize,
    pub refunded_order_count: usize,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub key: String,
    pub sku: Option<String>,
    pub title: String,
    pub quantity: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundTrendPoint {
    pub date: NaiveDate,
    pub count: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRefundRow {
    pub refund_id: String,
    pub date: DateTime<Utc>,
    pub order_name: String,
    pub reason: Option<String>,
    pub sku: Option<String>,
    pub title: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonBreakdown {
    pub reason: String,
    pub category: ReasonCategory,
    pub count: usize,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonTrendPoint {
    pub date: NaiveDate,
    pub reason: String,
    pub count: usize,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReasonRow {
    pub product: String,
    pub sku: String,
    pub reason: String,
    pub count: usize,
    pub quantity: u64,
}

pub fn dashboard_metrics(orders: &[OrderRecord], refunds: &[RefundRecord], currency: &str) -> DashboardMetrics {
    let gross: Decimal = orders.iter().map(|o| o.total_amount).sum();
    let refunded: Decimal = refunds.iter().map(|r| r.amount).sum();
    let rate = if gross.is_zero() {
        Decimal::ZERO
    } else {
        refunded / gross * Decimal::ONE_HUNDRED
    };
    let refunded_orders: HashSet<&str> = refunds.iter().map(|r| r.order_id.as_str()).collect();

    DashboardMetrics {
        gross_sales: round_money(gross),
        total_refunds: round_money(refunded),
        net_revenue: round_money(gross - refunded),
        refund_rate: round_money(rate),
        order_count: orders.len(),
        refund_count: refunds.len(),
        refunded_order_count: refunded_orders.len(),
        currency: currency.to_string(),
    }
}

/// Line items of every refund, skipping refunds whose stored list is unreadable.
fn decoded_items(refunds: &[RefundRecord]) -> impl Iterator<Item = (&RefundRecord, rrad_core::LineItem)> {
    refunds.iter().flat_map(|refund| {
        let items = match refund.decoded_line_items() {
            Ok(items) => items,
            Err(err) => {
                warn!(refund_id = %refund.id, error = %err, "skipping unreadable line items");
                Vec::new()
            }
        };
        items.into_iter().map(move |item| (refund, item))
    })
}

pub fn top_refunded_products(refunds: &[RefundRecord], limit: usize) -> Vec<TopProduct> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Option<String>, String, u64, Decimal)> = HashMap::new();

    for (_, item) in decoded_items(refunds) {
        let key = item.product_key().to_string();
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (
                item.sku.clone().filter(|s| !s.trim().is_empty()),
                item.display_title().to_string(),
                0,
                Decimal::ZERO,
            )
        });
        entry.2 += u64::from(item.quantity);
        entry.3 += item.amount;
    }

    let mut products: Vec<TopProduct> = order
        .into_iter()
        .filter_map(|key| {
            let (sku, title, quantity, amount) = groups.remove(&key)?;
            Some(TopProduct {
                key,
                sku,
                title,
                quantity,
                amount,
            })
        })
        .collect();
    products.sort_by(|a, b| b.amount.cmp(&a.amount));
    products.truncate(limit);
    for product in &mut products {
        product.amount = round_money(product.amount);
    }
    products
}

/// Buckets by the refund's own date.
pub fn refund_trend(refunds: &[RefundRecord]) -> Vec<RefundTrendPoint> {
    let mut days: BTreeMap<NaiveDate, (usize, Decimal)> = BTreeMap::new();
    for refund in refunds {
        let day = days.entry(calendar_date(refund.refund_date)).or_default();
        day.0 += 1;
        day.1 += refund.amount;
    }
    days.into_iter()
        .map(|(date, (count, amount))| RefundTrendPoint {
            date,
            count,
            amount: round_money(amount),
        })
        .collect()
}

pub fn product_refunds(refunds: &[RefundRecord]) -> Vec<ProductRefundRow> {
    let mut rows: Vec<ProductRefundRow> = decoded_items(refunds)
        .map(|(refund, item)| ProductRefundRow {
            refund_id: refund.id.clone(),
            date: refund.refund_date,
            order_name: refund.order_name.clone(),
            reason: refund.reason.clone(),
            title: item.display_title().to_string(),
            sku: item.sku.filter(|s| !s.trim().is_empty()),
            quantity: item.quantity,
            amount: round_money(item.amount),
        })
        .collect();
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    rows
}

fn reason_label(record: &ReturnReasonRecord) -> &str {
    if record.reason.trim().is_empty() {
        UNKNOWN_LABEL
    } else {
        &record.reason
    }
}

pub fn return_reason_breakdown(records: &[ReturnReasonRecord]) -> Vec<ReasonBreakdown> {
    let mut rows: Vec<ReasonBreakdown> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in records {
        let label = reason_label(record);
        let slot = *index.entry(label.to_string()).or_insert_with(|| {
            rows.push(ReasonBreakdown {
                reason: label.to_string(),
                category: record.category,
                count: 0,
                quantity: 0,
            });
            rows.len() - 1
        });
        rows[slot].count += 1;
        rows[slot].quantity += u64::from(record.quantity);
    }
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

pub fn return_reason_trend(records: &[ReturnReasonRecord]) -> Vec<ReasonTrendPoint> {
    let mut points: BTreeMap<(NaiveDate, String), (usize, u64)> = BTreeMap::new();
    for record in records {
        let entry = points
            .entry((calendar_date(record.created_at), reason_label(record).to_string()))
            .or_default();
        entry.0 += 1;
        entry.1 += u64::from(record.quantity);
    }
    points
        .into_iter()
        .map(|((date, reason), (count, quantity))| ReasonTrendPoint {
            date,
            reason,
            count,
            quantity,
        })
        .collect()
}

pub fn return_reasons_by_product(records: &[ReturnReasonRecord]) -> Vec<ProductReasonRow> {
    let mut rows: Vec<ProductReasonRow> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    for record in records {
        let key = (record.product_title.clone(), reason_label(record).to_string());
        let slot = *index.entry(key).or_insert_with(|| {
            rows.push(ProductReasonRow {
                product: record.product_title.clone(),
                sku: record.sku.clone().unwrap_or_default(),
                reason: reason_label(record).to_string(),
                count: 0,
                quantity: 0,
            });
            rows.len() - 1
        });
        rows[slot].count += 1;
        rows[slot].quantity += u64::from(record.quantity);
    }
    rows.sort_by(|a, b| b.quantity.cmp(&a.quantity));
    rows
}

/// Windowed reports for one shop, read straight from the record store.
#[derive(Clone)]
pub struct ReportEngine {
    store: Arc<dyn RecordStore>,
}

impl ReportEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn dashboard(&self, shop: &str, days: TrailingDays) -> Result<DashboardMetrics, StoreError> {
        let since = days.since(Utc::now());
        let (orders, refunds, shop_row) = tokio::try_join!(
            self.store.orders_since(shop, since),
            self.store.refunds_since(shop, since),
            self.store.shop(shop),
        )?;
        let currency = shop_row
            .map(|s| s.currency)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        Ok(dashboard_metrics(&orders, &refunds, &currency))
    }

    pub async fn top_products(
        &self,
        shop: &str,
        days: TrailingDays,
        limit: usize,
    ) -> Result<Vec<TopProduct>, StoreError> {
        let refunds = self.refunds(shop, days).await?;
        Ok(top_refunded_products(&refunds, limit))
    }

    pub async fn refund_trend(&self, shop: &str, days: TrailingDays) -> Result<Vec<RefundTrendPoint>, StoreError> {
        Ok(refund_trend(&self.refunds(shop, days).await?))
    }

    pub async fn product_refunds(&self, shop: &str, days: TrailingDays) -> Result<Vec<ProductRefundRow>, StoreError> {
        Ok(product_refunds(&self.refunds(shop, days).await?))
    }

    pub async fn return_reasons(&self, shop: &str, days: TrailingDays) -> Result<Vec<ReasonBreakdown>, StoreError> {
        Ok(return_reason_breakdown(&self.reasons(shop, days).await?))
    }

    pub async fn return_reason_trend(
        &self,
        shop: &str,
        days: TrailingDays,
    ) -> Result<Vec<ReasonTrendPoint>, StoreError> {
        Ok(return_reason_trend(&self.reasons(shop, days).await?))
    }

    pub async fn return_reasons_by_product(
        &self,
        shop: &str,
        days: TrailingDays,
    ) -> Result<Vec<ProductReasonRow>, StoreError> {
        Ok(return_reasons_by_product(&self.reasons(shop, days).await?))
    }

    async fn refunds(&self, shop: &str, days: TrailingDays) -> Result<Vec<RefundRecord>, StoreError> {
        self.store.refunds_since(shop, days.since(Utc::now())).await
    }

    async fn reasons(&self, shop: &str, days: TrailingDays) -> Result<Vec<ReturnReasonRecord>, StoreError> {
        self.store.return_reasons_since(shop, days.since(Utc::now())).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rrad_core::{encode_line_items, LineItem};
    use rrad_storage::MemoryRecordStore;

    use super::*;

    const SHOP: &str = "demo.myshopify.com";

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn order(id: &str, total: &str, at: DateTime<Utc>) -> OrderRecord {
        OrderRecord {
            id: id.into(),
            shop: SHOP.into(),
            name: format!("#{id}"),
            order_date: at,
            total_amount: dec(total),
            currency: "USD".into(),
            financial_status: "PAID".into(),
        }
    }

    fn refund(id: &str, order_id: &str, amount: &str, at: DateTime<Utc>, line_items: String) -> RefundRecord {
        RefundRecord {
            id: id.into(),
            shop: SHOP.into(),
            order_id: order_id.into(),
            order_name: format!("#{order_id}"),
            refund_date: at,
            amount: dec(amount),
            currency: "USD".into(),
            note: None,
            reason: None,
            line_items,
            has_return: false,
            return_id: None,
        }
    }

    fn item(sku: Option<&str>, title: &str, quantity: u32, amount: &str) -> LineItem {
        LineItem {
            sku: sku.map(str::to_string),
            title: title.into(),
            quantity,
            amount: dec(amount),
        }
    }

    fn reason(id: &str, label: &str, product: &str, quantity: u32, at: &str) -> ReturnReasonRecord {
        ReturnReasonRecord {
            id: id.into(),
            shop: SHOP.into(),
            return_id: "gid://shopify/Return/1".into(),
            order_id: "gid://shopify/Order/1".into(),
            reason: label.into(),
            category: ReasonCategory::Sizing,
            product_title: product.into(),
            sku: None,
            quantity,
            created_at: at.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn dashboard_scenario_over_trailing_window() {
        let store = Arc::new(MemoryRecordStore::new());
        let now = Utc::now();
        store.upsert_order(&order("1", "200.00", now - Duration::days(20))).await.unwrap();
        store
            .upsert_refund(&refund(
                "r1",
                "1",
                "50.00",
                now - Duration::days(5),
                encode_line_items(&[
                    item(Some("APP-TSH-001"), "Tee", 1, "29.99"),
                    item(None, "Other", 1, "20.01"),
                ]),
            ))
            .await
            .unwrap();

        let engine = ReportEngine::new(store);
        let metrics = engine.dashboard(SHOP, TrailingDays::new(30)).await.unwrap();
        assert_eq!(metrics.gross_sales, dec("200"));
        assert_eq!(metrics.total_refunds, dec("50"));
        assert_eq!(metrics.net_revenue, dec("150"));
        assert_eq!(metrics.refund_rate, dec("25"));
        assert_eq!(metrics.refund_count, 1);
        assert_eq!(metrics.refunded_order_count, 1);
        assert_eq!(metrics.currency, "USD");

        let narrow = engine.dashboard(SHOP, TrailingDays::new(7)).await.unwrap();
        assert_eq!(narrow.gross_sales, Decimal::ZERO);
        assert_eq!(narrow.total_refunds, dec("50"));
        assert_eq!(narrow.refund_rate, Decimal::ZERO);
    }

    #[test]
    fn empty_window_is_all_zeros() {
        let metrics = dashboard_metrics(&[], &[], "USD");
        assert_eq!(metrics.gross_sales, Decimal::ZERO);
        assert_eq!(metrics.total_refunds, Decimal::ZERO);
        assert_eq!(metrics.net_revenue, Decimal::ZERO);
        assert_eq!(metrics.refund_rate, Decimal::ZERO);

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["refundRate"], 0.0);
        assert!(top_refunded_products(&[], 10).is_empty());
        assert!(refund_trend(&[]).is_empty());
        assert!(product_refunds(&[]).is_empty());
        assert!(return_reason_breakdown(&[]).is_empty());
        assert!(return_reason_trend(&[]).is_empty());
        assert!(return_reasons_by_product(&[]).is_empty());
    }

    #[test]
    fn zero_amount_refund_counts_but_adds_nothing() {
        let at: DateTime<Utc> = "2026-03-10T00:00:00Z".parse().unwrap();
        let refunds = vec![
            refund("r1", "1", "40.00", at, encode_line_items(&[item(Some("A"), "A", 1, "40.00")])),
            refund("r2", "2", "0", at, encode_line_items(&[item(Some("B"), "B", 1, "0")])),
        ];
        let metrics = dashboard_metrics(&[order("1", "100", at)], &refunds, "USD");
        assert_eq!(metrics.refund_count, 2);
        assert_eq!(metrics.total_refunds, dec("40"));
        assert_eq!(product_refunds(&refunds).len(), 2);
    }

    #[test]
    fn repeated_cents_sum_exactly() {
        let at: DateTime<Utc> = "2026-03-10T00:00:00Z".parse().unwrap();
        let refunds: Vec<RefundRecord> = (0..10)
            .map(|n| refund(&format!("r{n}"), &format!("{n}"), "33.33", at, "[]".into()))
            .collect();
        let metrics = dashboard_metrics(&[], &refunds, "USD");
        assert_eq!(metrics.total_refunds, dec("333.30"));
        assert_eq!(metrics.refunded_order_count, 10);
    }

    #[test]
    fn malformed_line_items_do_not_hide_valid_ones() {
        let at: DateTime<Utc> = "2026-03-10T00:00:00Z".parse().unwrap();
        let refunds = vec![
            refund("r1", "1", "10", at, encode_line_items(&[item(Some("A"), "Alpha", 2, "10")])),
            refund("r2", "2", "5", at, "{broken".into()),
            refund("r3", "3", "7", at, encode_line_items(&[item(Some("A"), "Alpha", 1, "7"), item(None, "Beta", 1, "3")])),
        ];

        let top = top_refunded_products(&refunds, 10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key, "A");
        assert_eq!(top[0].quantity, 3);
        assert_eq!(top[0].amount, dec("17"));
        assert_eq!(top[1].key, "Beta");
        assert_eq!(top[1].sku, None);

        assert_eq!(product_refunds(&refunds).len(), 3);
        assert_eq!(top_refunded_products(&refunds, 1).len(), 1);
    }

    #[test]
    fn trend_buckets_by_refund_date_ascending() {
        let refunds = vec![
            refund("r2", "1", "5.005", "2026-03-11T23:59:00Z".parse().unwrap(), "[]".into()),
            refund("r1", "1", "10", "2026-03-10T01:00:00Z".parse().unwrap(), "[]".into()),
            refund("r3", "2", "5.005", "2026-03-11T00:00:00Z".parse().unwrap(), "[]".into()),
        ];
        let trend = refund_trend(&refunds);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].date.to_string(), "2026-03-10");
        assert_eq!(trend[1].count, 2);
        assert_eq!(trend[1].amount, dec("10.01"));
    }

    #[test]
    fn product_rows_are_newest_first() {
        let old: DateTime<Utc> = "2026-03-01T00:00:00Z".parse().unwrap();
        let new: DateTime<Utc> = "2026-03-09T00:00:00Z".parse().unwrap();
        let refunds = vec![
            refund("r1", "1", "1", old, encode_line_items(&[item(None, "", 1, "1")])),
            refund("r2", "2", "2", new, encode_line_items(&[item(Some("S"), "Shirt", 1, "2")])),
        ];
        let rows = product_refunds(&refunds);
        assert_eq!(rows[0].refund_id, "r2");
        assert_eq!(rows[1].title, "Unknown");
    }

    #[test]
    fn reason_reports_group_and_sort() {
        let records = vec![
            reason("1", "Size too small", "Tee", 1, "2026-03-02T10:00:00Z"),
            reason("2", "Size too small", "Tee", 2, "2026-03-01T10:00:00Z"),
            reason("3", "Damaged", "Mug", 5, "2026-03-01T12:00:00Z"),
            reason("4", "", "Mug", 1, "2026-03-03T12:00:00Z"),
        ];

        let breakdown = return_reason_breakdown(&records);
        assert_eq!(breakdown[0].reason, "Size too small");
        assert_eq!(breakdown[0].count, 2);
        assert_eq!(breakdown[0].quantity, 3);
        assert!(breakdown.iter().any(|b| b.reason == "Unknown"));

        let trend = return_reason_trend(&records);
        assert_eq!(trend.len(), 4);
        assert!(trend.windows(2).all(|w| w[0].date <= w[1].date));

        let by_product = return_reasons_by_product(&records);
        assert_eq!(by_product[0].product, "Mug");
        assert_eq!(by_product[0].reason, "Damaged");
        assert_eq!(by_product[0].quantity, 5);
        assert_eq!(by_product[0].sku, "");
    }
}
