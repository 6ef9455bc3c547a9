//! Typed origin payload → canonical record mapping.
//!
//! All defaulting lives here: missing currency falls back to the caller's shop
//! currency, missing financial status to `PAID`, missing titles and reasons to
//! `Unknown`, and missing collections to empty.

use chrono::{DateTime, Utc};
use rrad_core::{
    encode_line_items, synthesize_order_name, LineItem, OrderRecord, RefundRecord,
    ReturnReasonRecord, DEFAULT_FINANCIAL_STATUS, UNKNOWN_LABEL,
};
use serde::Deserialize;

use crate::graphql::{Connection, MoneyBag, RefundDetail, ReturnDetail};
use crate::reasons::ReasonTaxonomy;

/// One order line of the bulk export JSONL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOrder {
    pub id: String,
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub total_price_set: Option<MoneyBag>,
    pub display_financial_status: Option<String>,
    #[serde(default)]
    pub refunds: Option<Vec<ExportRefundSummary>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExportRefundSummary {
    pub id: String,
}

impl ExportOrder {
    pub fn currency(&self) -> Option<&str> {
        MoneyBag::currency(self.total_price_set.as_ref())
    }

    pub fn refund_ids(&self) -> impl Iterator<Item = &str> {
        self.refunds
            .iter()
            .flatten()
            .map(|r| r.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// `None` when the order carries no creation timestamp; it cannot be windowed.
pub fn order_from_export(order: &ExportOrder, shop: &str, fallback_currency: &str) -> Option<OrderRecord> {
    let order_date = order.created_at?;
    Some(OrderRecord {
        id: order.id.clone(),
        shop: shop.to_string(),
        name: order
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| synthesize_order_name(&order.id)),
        order_date,
        total_amount: MoneyBag::amount(order.total_price_set.as_ref()),
        currency: order.currency().unwrap_or(fallback_currency).to_string(),
        financial_status: order
            .display_financial_status
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_FINANCIAL_STATUS)
            .to_ascii_uppercase(),
    })
}

/// `None` when the refund carries no timestamp; reporting buckets on it.
pub fn refund_from_detail(
    detail: &RefundDetail,
    shop: &str,
    fallback_currency: &str,
) -> Option<RefundRecord> {
    let refund_date = detail.created_at?;

    let line_items: Vec<LineItem> = Connection::nodes(detail.refund_line_items.as_ref())
        .map(|node| {
            let item = node.line_item.as_ref();
            LineItem {
                sku: item
                    .and_then(|li| li.sku.clone())
                    .filter(|s| !s.is_empty()),
                title: item
                    .and_then(|li| li.title.clone())
                    .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
                quantity: node.quantity.unwrap_or(1),
                amount: MoneyBag::amount(node.subtotal_set.as_ref()),
            }
        })
        .collect();

    let reason = Connection::nodes(detail.order_adjustments.as_ref())
        .filter_map(|adj| adj.reason.clone())
        .find(|r| !r.is_empty());

    let order_id = detail
        .order
        .as_ref()
        .map(|o| o.id.clone())
        .unwrap_or_default();
    let order_name = detail
        .order
        .as_ref()
        .and_then(|o| o.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            if order_id.is_empty() {
                UNKNOWN_LABEL.to_string()
            } else {
                synthesize_order_name(&order_id)
            }
        });

    let return_id = detail
        .linked_return
        .as_ref()
        .map(|r| r.id.clone())
        .filter(|id| !id.is_empty());

    Some(RefundRecord {
        id: detail.id.clone(),
        shop: shop.to_string(),
        order_id,
        order_name,
        refund_date,
        amount: MoneyBag::amount(detail.total_refunded_set.as_ref()),
        currency: MoneyBag::currency(detail.total_refunded_set.as_ref())
            .unwrap_or(fallback_currency)
            .to_string(),
        note: detail.note.clone().filter(|n| !n.is_empty()),
        reason,
        line_items: encode_line_items(&line_items),
        has_return: return_id.is_some(),
        return_id,
    })
}

/// One row per returned line item. Items without an origin id are skipped.
pub fn return_reasons_from_detail(
    detail: &ReturnDetail,
    shop: &str,
    taxonomy: &ReasonTaxonomy,
    fallback_created_at: DateTime<Utc>,
) -> Vec<ReturnReasonRecord> {
    let order_id = detail
        .order
        .as_ref()
        .map(|o| o.id.clone())
        .unwrap_or_default();
    let created_at = detail.created_at.unwrap_or(fallback_created_at);

    Connection::nodes(detail.return_line_items.as_ref())
        .filter_map(|node| {
            let id = node.id.clone().filter(|id| !id.is_empty())?;
            let definition = node.return_reason_definition.as_ref();
            let mapped = taxonomy.map_return_reason(
                definition.and_then(|d| d.handle.as_deref()),
                definition.and_then(|d| d.name.as_deref()),
            );
            let line_item = node
                .fulfillment_line_item
                .as_ref()
                .and_then(|f| f.line_item.as_ref());
            let product_title = line_item
                .and_then(|li| {
                    li.product
                        .as_ref()
                        .and_then(|p| p.title.clone())
                        .or_else(|| li.title.clone())
                })
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string());

            Some(ReturnReasonRecord {
                id,
                shop: shop.to_string(),
                return_id: detail.id.clone(),
                order_id: order_id.clone(),
                reason: mapped.label,
                category: mapped.category,
                product_title,
                sku: line_item.and_then(|li| li.sku.clone()).filter(|s| !s.is_empty()),
                quantity: node.quantity.unwrap_or(1),
                created_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rrad_core::ReasonCategory;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn export_order_defaults_status_and_currency() {
        let order: ExportOrder = serde_json::from_value(json!({
            "id": "gid://shopify/Order/1001",
            "createdAt": "2026-03-01T10:00:00Z",
            "totalPriceSet": { "shopMoney": { "amount": "120.50" } },
            "refunds": [{ "id": "gid://shopify/Refund/7" }]
        }))
        .unwrap();

        let record = order_from_export(&order, "demo.myshopify.com", "EUR").unwrap();
        assert_eq!(record.name, "#1001");
        assert_eq!(record.currency, "EUR");
        assert_eq!(record.financial_status, "PAID");
        assert_eq!(record.total_amount, dec("120.50"));
        assert_eq!(order.refund_ids().collect::<Vec<_>>(), vec!["gid://shopify/Refund/7"]);
    }

    #[test]
    fn export_order_without_timestamp_is_skipped() {
        let order: ExportOrder =
            serde_json::from_value(json!({ "id": "gid://shopify/Order/1", "refunds": null })).unwrap();
        assert!(order_from_export(&order, "s", "USD").is_none());
        assert_eq!(order.refund_ids().count(), 0);
    }

    #[test]
    fn refund_detail_maps_line_items_reason_and_return_link() {
        let detail: RefundDetail = serde_json::from_value(json!({
            "id": "gid://shopify/Refund/7",
            "createdAt": "2026-03-04T08:30:00Z",
            "note": "",
            "totalRefundedSet": { "shopMoney": { "amount": "50.00", "currencyCode": "USD" } },
            "order": { "id": "gid://shopify/Order/1001", "name": "#1001" },
            "return": { "id": "gid://shopify/Return/55" },
            "refundLineItems": { "edges": [
                { "node": { "quantity": 2, "subtotalSet": { "shopMoney": { "amount": "40.00" } },
                            "lineItem": { "title": "Linen Shirt", "sku": "LS-M" } } },
                { "node": { "subtotalSet": { "shopMoney": { "amount": "10.00" } },
                            "lineItem": { "title": "Gift Wrap", "sku": "" } } }
            ]},
            "orderAdjustments": { "edges": [ { "node": { "reason": "REFUND_DISCREPANCY" } } ] }
        }))
        .unwrap();

        let record = refund_from_detail(&detail, "demo.myshopify.com", "CAD").unwrap();
        assert_eq!(record.order_name, "#1001");
        assert_eq!(record.currency, "USD");
        assert_eq!(record.amount, dec("50.00"));
        assert_eq!(record.note, None);
        assert_eq!(record.reason.as_deref(), Some("REFUND_DISCREPANCY"));
        assert!(record.has_return);
        assert_eq!(record.return_id.as_deref(), Some("gid://shopify/Return/55"));

        let items = record.decoded_line_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].sku.as_deref(), Some("LS-M"));
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[1].sku, None);
        assert_eq!(items[1].quantity, 1);
        assert_eq!(items[1].product_key(), "Gift Wrap");
    }

    #[test]
    fn sparse_refund_detail_gets_documented_defaults() {
        let detail: RefundDetail = serde_json::from_value(json!({
            "id": "gid://shopify/Refund/8",
            "createdAt": "2026-03-04T08:30:00Z"
        }))
        .unwrap();

        let record = refund_from_detail(&detail, "s", "GBP").unwrap();
        assert_eq!(record.order_name, "Unknown");
        assert_eq!(record.currency, "GBP");
        assert_eq!(record.amount, Decimal::ZERO);
        assert_eq!(record.line_items, "[]");
        assert!(!record.has_return);
        assert_eq!(record.reason, None);
    }

    #[test]
    fn return_detail_yields_one_row_per_identified_line_item() {
        let detail: ReturnDetail = serde_json::from_value(json!({
            "id": "gid://shopify/Return/55",
            "order": { "id": "gid://shopify/Order/1001" },
            "returnLineItems": { "edges": [
                { "node": {
                    "id": "gid://shopify/ReturnLineItem/1",
                    "quantity": 1,
                    "returnReasonDefinition": { "handle": "too-small", "name": "Size too small" },
                    "fulfillmentLineItem": { "lineItem": {
                        "title": "Linen Shirt - M", "sku": "LS-M",
                        "product": { "id": "gid://shopify/Product/9", "title": "Linen Shirt" } } }
                }},
                { "node": {
                    "id": "gid://shopify/ReturnLineItem/2",
                    "returnReasonDefinition": { "handle": "future-new-reason", "name": "Future new reason" }
                }},
                { "node": { "quantity": 3 } }
            ]}
        }))
        .unwrap();

        let fallback = Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();
        let rows = return_reasons_from_detail(&detail, "s", &ReasonTaxonomy::built_in(), fallback);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].category, ReasonCategory::Sizing);
        assert_eq!(rows[0].product_title, "Linen Shirt");
        assert_eq!(rows[0].sku.as_deref(), Some("LS-M"));
        assert_eq!(rows[0].order_id, "gid://shopify/Order/1001");
        assert_eq!(rows[0].created_at, fallback);

        assert_eq!(rows[1].category, ReasonCategory::Other);
        assert_eq!(rows[1].reason, "Future new reason");
        assert_eq!(rows[1].product_title, "Unknown");
        assert_eq!(rows[1].quantity, 1);
    }
}
