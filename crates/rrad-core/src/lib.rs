//! Core domain model for Refund Radar: shops, synced commerce records and the
//! small value types shared by the sync pipeline and the report engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "rrad-core";

/// Currency assumed when neither the record nor the shop carries one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Label used wherever the origin omitted a human-readable name.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Financial status assumed for exported orders that omit one.
pub const DEFAULT_FINANCIAL_STATUS: &str = "PAID";

const GID_PREFIX: &str = "gid://shopify/";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Per-shop bulk sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseEnumError {
                kind: "sync status",
                value: other.to_string(),
            }),
        }
    }
}

/// One tenant store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: String,
    pub currency: String,
    pub sync_status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_operation_id: Option<String>,
    pub plan: Option<String>,
}

impl Shop {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            currency: DEFAULT_CURRENCY.to_string(),
            sync_status: SyncStatus::Pending,
            last_sync_at: None,
            sync_operation_id: None,
            plan: None,
        }
    }

    /// True while a bulk operation is in flight or finished upstream but not yet ingested.
    pub fn awaiting_poll(&self) -> bool {
        match self.sync_status {
            SyncStatus::Running => true,
            SyncStatus::Completed => self.sync_operation_id.is_some(),
            SyncStatus::Pending | SyncStatus::Failed => false,
        }
    }
}

/// Read model of a shop's sync progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub operation_id: Option<String>,
}

impl SyncState {
    pub fn pending() -> Self {
        Self {
            status: SyncStatus::Pending,
            last_sync_at: None,
            operation_id: None,
        }
    }
}

impl From<&Shop> for SyncState {
    fn from(shop: &Shop) -> Self {
        Self {
            status: shop.sync_status,
            last_sync_at: shop.last_sync_at,
            operation_id: shop.sync_operation_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub shop: String,
    pub name: String,
    pub order_date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub currency: String,
    pub financial_status: String,
}

/// Canonical refunded line item, persisted as part of a JSON list on the refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub amount: Decimal,
}

fn default_quantity() -> u32 {
    1
}

impl LineItem {
    /// Grouping key: the SKU when present, otherwise the title.
    pub fn product_key(&self) -> &str {
        match self.sku.as_deref() {
            Some(sku) if !sku.trim().is_empty() => sku,
            _ => self.display_title(),
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            UNKNOWN_LABEL
        } else {
            &self.title
        }
    }
}

/// Serialize a line-item list into the stored column form.
pub fn encode_line_items(items: &[LineItem]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored line-item list.
///
/// Fails only when the column is not a JSON array at all. Individual entries
/// that do not fit the line-item shape are dropped.
pub fn decode_line_items(raw: &str) -> Result<Vec<LineItem>, serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRecord {
    pub id: String,
    pub shop: String,
    pub order_id: String,
    pub order_name: String,
    /// When the refund happened. Reports bucket by this, never by the order date.
    pub refund_date: DateTime<Utc>,
    pub amount: Decimal,
    pub currency: String,
    pub note: Option<String>,
    pub reason: Option<String>,
    pub line_items: String,
    pub has_return: bool,
    pub return_id: Option<String>,
}

impl RefundRecord {
    pub fn decoded_line_items(&self) -> Result<Vec<LineItem>, serde_json::Error> {
        decode_line_items(&self.line_items)
    }
}

/// Closed taxonomy that normalizes origin return reasons for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReasonCategory {
    Sizing,
    Preference,
    Accuracy,
    Quality,
    Fulfillment,
    #[default]
    Other,
}

impl ReasonCategory {
    pub const ALL: [ReasonCategory; 6] = [
        Self::Sizing,
        Self::Preference,
        Self::Accuracy,
        Self::Quality,
        Self::Fulfillment,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sizing => "Sizing",
            Self::Preference => "Preference",
            Self::Accuracy => "Accuracy",
            Self::Quality => "Quality",
            Self::Fulfillment => "Fulfillment",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for ReasonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                kind: "reason category",
                value: s.to_string(),
            })
    }
}

/// One returned line item inside a structured return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnReasonRecord {
    pub id: String,
    pub shop: String,
    pub return_id: String,
    pub order_id: String,
    pub reason: String,
    pub category: ReasonCategory,
    pub product_title: String,
    pub sku: Option<String>,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

/// Row counts removed by an erasure request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCounts {
    pub shops: u64,
    pub orders: u64,
    pub refunds: u64,
    pub return_reasons: u64,
}

/// Round a monetary value to minor units. Only applied at output boundaries.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Build an origin global id such as `gid://shopify/Refund/123`.
pub fn gid(kind: &str, id: impl fmt::Display) -> String {
    format!("{GID_PREFIX}{kind}/{id}")
}

/// The resource type segment of a global id (`Order`, `Refund`, ...).
pub fn gid_kind(id: &str) -> Option<&str> {
    let rest = id.strip_prefix(GID_PREFIX)?;
    let (kind, tail) = rest.split_once('/')?;
    if kind.is_empty() || tail.is_empty() {
        None
    } else {
        Some(kind)
    }
}

/// Display name used when an order's real name is not known locally.
pub fn synthesize_order_name(order_id: &str) -> String {
    let tail = order_id.rsplit('/').next().unwrap_or(order_id);
    let tail = tail.split('?').next().unwrap_or(tail);
    format!("#{tail}")
}

/// Trailing report window length in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingDays(u32);

impl TrailingDays {
    pub const DEFAULT: u32 = 30;
    pub const MAX: u32 = 365;

    pub fn new(days: u32) -> Self {
        Self(days.clamp(1, Self::MAX))
    }

    /// Lenient query-string parse: anything missing or invalid falls back to 30 days.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).and_then(|v| v.parse::<i64>().ok()) {
            Some(days) if days >= 1 => Self(days.min(i64::from(Self::MAX)) as u32),
            _ => Self(Self::DEFAULT),
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Start of the window: `now - days`, truncated to midnight UTC.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let day = (now - Duration::days(i64::from(self.0))).date_naive();
        Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
    }
}

impl Default for TrailingDays {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

pub fn calendar_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn decimal_sum_has_no_float_drift() {
        let total: Decimal = std::iter::repeat(dec("33.33")).take(10).sum();
        assert_eq!(total, dec("333.30"));
        let cents: i64 = std::iter::repeat(3333_i64).take(10).sum();
        assert_eq!(total, Decimal::new(cents, 2));
    }

    #[test]
    fn round_money_only_rounds_to_cents() {
        assert_eq!(round_money(dec("10.005")), dec("10.01"));
        assert_eq!(round_money(dec("-10.005")), dec("-10.01"));
        assert_eq!(round_money(dec("7")), dec("7"));
    }

    #[test]
    fn line_item_decode_drops_only_bad_entries() {
        let raw = r#"[{"sku":"A","title":"Shirt","quantity":2,"amount":"10.50"},"junk",{"title":"Mug","amount":4}]"#;
        let items = decode_line_items(raw).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_key(), "A");
        assert_eq!(items[1].product_key(), "Mug");
        assert_eq!(items[1].quantity, 1);
        assert_eq!(items[1].amount, dec("4"));

        assert!(decode_line_items("{not json").is_err());
    }

    #[test]
    fn line_items_survive_encode_decode() {
        let items = vec![LineItem {
            sku: None,
            title: String::new(),
            quantity: 3,
            amount: dec("29.99"),
        }];
        let decoded = decode_line_items(&encode_line_items(&items)).unwrap();
        assert_eq!(decoded, items);
        assert_eq!(decoded[0].product_key(), UNKNOWN_LABEL);
    }

    #[test]
    fn awaiting_poll_follows_operation_id() {
        let mut shop = Shop::new("a.myshopify.com");
        assert!(!shop.awaiting_poll());
        shop.sync_status = SyncStatus::Running;
        assert!(shop.awaiting_poll());
        shop.sync_status = SyncStatus::Completed;
        assert!(!shop.awaiting_poll());
        shop.sync_operation_id = Some(gid("BulkOperation", 1));
        assert!(shop.awaiting_poll());
    }

    #[test]
    fn gid_helpers() {
        let id = gid("Refund", 9999);
        assert_eq!(id, "gid://shopify/Refund/9999");
        assert_eq!(gid_kind(&id), Some("Refund"));
        assert_eq!(gid_kind("Refund/1"), None);
        assert_eq!(synthesize_order_name(&gid("Order", 1001)), "#1001");
    }

    #[test]
    fn trailing_days_parse_and_window() {
        assert_eq!(TrailingDays::parse(None).get(), 30);
        assert_eq!(TrailingDays::parse(Some("abc")).get(), 30);
        assert_eq!(TrailingDays::parse(Some("0")).get(), 30);
        assert_eq!(TrailingDays::parse(Some("7")).get(), 7);
        assert_eq!(TrailingDays::parse(Some("9000")).get(), 365);

        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 30, 0).unwrap();
        let since = TrailingDays::new(7).since(now);
        assert_eq!(since, Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!("sizing".parse::<ReasonCategory>(), Ok(ReasonCategory::Sizing));
        assert!("bogus".parse::<ReasonCategory>().is_err());
        assert_eq!(ReasonCategory::default(), ReasonCategory::Other);
    }
}
