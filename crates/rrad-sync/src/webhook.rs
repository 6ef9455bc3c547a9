//! Topic-keyed dispatch of origin webhook deliveries.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rrad_adapters::{ClientProvider, CommerceApi};
use rrad_core::{
    encode_line_items, gid, synthesize_order_name, LineItem, PurgeCounts, RefundRecord,
    DEFAULT_CURRENCY,
};
use rrad_storage::{RecordStore, StoreError};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::enrich::DetailEnricher;
use crate::orchestrator::{BulkSyncOrchestrator, PollOutcome};
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookTopic {
    AppUninstalled,
    RefundsCreate,
    OrdersUpdated,
    BulkOperationsFinish,
    CustomersDataRequest,
    CustomersRedact,
    ShopRedact,
}

impl WebhookTopic {
    pub const ALL: [WebhookTopic; 7] = [
        Self::AppUninstalled,
        Self::RefundsCreate,
        Self::OrdersUpdated,
        Self::BulkOperationsFinish,
        Self::CustomersDataRequest,
        Self::CustomersRedact,
        Self::ShopRedact,
    ];

    /// Delivery header form, e.g. `refunds/create`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppUninstalled => "app/uninstalled",
            Self::RefundsCreate => "refunds/create",
            Self::OrdersUpdated => "orders/updated",
            Self::BulkOperationsFinish => "bulk_operations/finish",
            Self::CustomersDataRequest => "customers/data_request",
            Self::CustomersRedact => "customers/redact",
            Self::ShopRedact => "shop/redact",
        }
    }
}

impl fmt::Display for WebhookTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts both `refunds/create` and `REFUNDS_CREATE`.
impl FromStr for WebhookTopic {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = s.trim().to_ascii_lowercase().replace('/', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().replace('/', "_") == folded)
            .ok_or_else(|| WebhookError::UnknownTopic(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unhandled webhook topic: {0}")]
    UnknownTopic(String),
    #[error("malformed {topic} payload: {source}")]
    Payload {
        topic: WebhookTopic,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Purged(PurgeCounts),
    Redacted(PurgeCounts),
    RefundSaved { refund_id: String, enriched: bool },
    FinancialStatusUpdated { order_id: String, applied: bool },
    SyncFailed,
    SyncPolled(PollOutcome),
    SyncMarkedCompleted,
    Acknowledged,
    Ignored(&'static str),
}

/// Numeric REST id, sometimes delivered as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RestId {
    Number(u64),
    Text(String),
}

impl RestId {
    fn to_gid(&self, kind: &str) -> String {
        match self {
            Self::Number(n) => gid(kind, n),
            Self::Text(s) if s.starts_with("gid://") => s.clone(),
            Self::Text(s) => gid(kind, s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefundCreatedPayload {
    id: RestId,
    #[serde(default)]
    admin_graphql_api_id: Option<String>,
    order_id: RestId,
    created_at: DateTime<Utc>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    transactions: Vec<RefundTransaction>,
    #[serde(default)]
    refund_line_items: Vec<RefundLineItemPayload>,
}

#[derive(Debug, Deserialize)]
struct RefundTransaction {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    currency: Option<String>,
}

impl RefundTransaction {
    fn is_successful_refund(&self) -> bool {
        self.kind.as_deref() == Some("refund") && self.status.as_deref() == Some("success")
    }
}

#[derive(Debug, Deserialize)]
struct RefundLineItemPayload {
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    subtotal: Option<Decimal>,
    #[serde(default)]
    line_item: Option<LineItemPayload>,
}

#[derive(Debug, Deserialize)]
struct LineItemPayload {
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderUpdatedPayload {
    id: RestId,
    #[serde(default)]
    admin_graphql_api_id: Option<String>,
    #[serde(default)]
    financial_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkOperationFinishedPayload {
    admin_graphql_api_id: String,
    status: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CustomerRedactPayload {
    #[serde(default)]
    orders_to_redact: Vec<RestId>,
}

fn decode<T: DeserializeOwned>(topic: WebhookTopic, payload: &JsonValue) -> Result<T, WebhookError> {
    T::deserialize(payload).map_err(|source| WebhookError::Payload { topic, source })
}

/// Applies webhook deliveries to the store. Every write is an upsert or a
/// keyed delete, so redelivery converges.
pub struct WebhookIngestor {
    store: Arc<dyn RecordStore>,
    clients: Arc<dyn ClientProvider>,
    orchestrator: Arc<BulkSyncOrchestrator>,
    enricher: Arc<DetailEnricher>,
}

impl WebhookIngestor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clients: Arc<dyn ClientProvider>,
        orchestrator: Arc<BulkSyncOrchestrator>,
        enricher: Arc<DetailEnricher>,
    ) -> Self {
        Self {
            store,
            clients,
            orchestrator,
            enricher,
        }
    }

    /// Parse the topic header and JSON body, then [`Self::ingest`].
    pub async fn ingest_raw(&self, topic: &str, shop: &str, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let topic: WebhookTopic = topic.parse()?;
        let payload: JsonValue =
            serde_json::from_slice(body).map_err(|source| WebhookError::Payload { topic, source })?;
        self.ingest(topic, shop, &payload).await
    }

    pub async fn ingest(
        &self,
        topic: WebhookTopic,
        shop: &str,
        payload: &JsonValue,
    ) -> Result<WebhookOutcome, WebhookError> {
        let span = info_span!("webhook", shop = %shop, topic = %topic);
        async {
            let outcome = match topic {
                WebhookTopic::AppUninstalled | WebhookTopic::ShopRedact => {
                    let counts = self.store.purge_shop(shop).await?;
                    info!(?counts, "shop data purged");
                    WebhookOutcome::Purged(counts)
                }
                WebhookTopic::RefundsCreate => self.refund_created(shop, decode(topic, payload)?).await?,
                WebhookTopic::OrdersUpdated => self.order_updated(shop, decode(topic, payload)?).await?,
                WebhookTopic::BulkOperationsFinish => {
                    self.bulk_operation_finished(shop, decode(topic, payload)?).await?
                }
                WebhookTopic::CustomersDataRequest => {
                    info!("customer data request acknowledged; no customer data is stored");
                    WebhookOutcome::Acknowledged
                }
                WebhookTopic::CustomersRedact => {
                    let payload: CustomerRedactPayload = decode(topic, payload)?;
                    let order_ids: Vec<String> =
                        payload.orders_to_redact.iter().map(|id| id.to_gid("Order")).collect();
                    let counts = self.store.redact_orders(shop, &order_ids).await?;
                    info!(orders = order_ids.len(), ?counts, "customer orders redacted");
                    WebhookOutcome::Redacted(counts)
                }
            };
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    async fn refund_created(
        &self,
        shop: &str,
        payload: RefundCreatedPayload,
    ) -> Result<WebhookOutcome, WebhookError> {
        let refund_id = payload
            .admin_graphql_api_id
            .clone()
            .unwrap_or_else(|| payload.id.to_gid("Refund"));
        let order_id = payload.order_id.to_gid("Order");

        let successful: Vec<&RefundTransaction> = payload
            .transactions
            .iter()
            .filter(|t| t.is_successful_refund())
            .collect();
        let amount: Decimal = successful.iter().filter_map(|t| t.amount).sum();

        let line_items: Vec<LineItem> = payload
            .refund_line_items
            .iter()
            .map(|rli| LineItem {
                sku: rli
                    .line_item
                    .as_ref()
                    .and_then(|li| li.sku.clone())
                    .filter(|s| !s.is_empty()),
                title: rli
                    .line_item
                    .as_ref()
                    .and_then(|li| li.title.clone())
                    .unwrap_or_default(),
                quantity: rli.quantity.unwrap_or(1),
                amount: rli.subtotal.unwrap_or_default(),
            })
            .collect();

        let existing = self.store.refund(shop, &refund_id).await?;
        let order_name = match self.store.order(shop, &order_id).await? {
            Some(order) => order.name,
            None => existing
                .as_ref()
                .map(|r| r.order_name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| synthesize_order_name(&order_id)),
        };

        let currency = match successful.iter().find_map(|t| t.currency.clone()) {
            Some(currency) => currency,
            None => self
                .store
                .shop(shop)
                .await?
                .map(|s| s.currency)
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        };

        let record = RefundRecord {
            id: refund_id.clone(),
            shop: shop.to_string(),
            order_id,
            order_name,
            refund_date: payload.created_at,
            amount,
            currency,
            note: payload.note.filter(|n| !n.is_empty()),
            reason: existing.as_ref().and_then(|r| r.reason.clone()),
            line_items: encode_line_items(&line_items),
            has_return: existing.as_ref().is_some_and(|r| r.has_return),
            return_id: existing.as_ref().and_then(|r| r.return_id.clone()),
        };
        self.store.upsert_refund(&record).await?;
        info!(refund_id = %record.id, amount = %record.amount, "refund saved from webhook");

        let enriched = match self.clients.client_for(shop) {
            Some(client) => match self.enrich_refund(client.as_ref(), record).await {
                Ok(enriched) => enriched,
                Err(err) => {
                    warn!(refund_id = %refund_id, error = %err, "refund enrichment failed");
                    false
                }
            },
            None => false,
        };

        Ok(WebhookOutcome::RefundSaved { refund_id, enriched })
    }

    /// Back-fill reason and return linkage; save reason rows for a linked return.
    async fn enrich_refund(&self, client: &dyn CommerceApi, mut record: RefundRecord) -> Result<bool, SyncError> {
        let Some(detail) = self.enricher.fetch_refund_detail(client, &record.id).await? else {
            debug!(refund_id = %record.id, "refund detail not available yet");
            return Ok(false);
        };

        if let Some(reason) = rrad_adapters::graphql::Connection::nodes(detail.order_adjustments.as_ref())
            .filter_map(|adj| adj.reason.clone())
            .find(|r| !r.is_empty())
        {
            record.reason = Some(reason);
        }
        if let Some(name) = detail.order.as_ref().and_then(|o| o.name.clone()).filter(|n| !n.is_empty()) {
            record.order_name = name;
        }
        if let Some(linked) = detail.linked_return.as_ref().filter(|r| !r.id.is_empty()) {
            record.has_return = true;
            record.return_id = Some(linked.id.clone());
        }
        self.store.upsert_refund(&record).await?;

        if let Some(return_id) = record.return_id.clone() {
            if let Some(detail) = self.enricher.fetch_return_detail(client, &return_id).await? {
                let fallbacks = HashMap::from([(return_id, record.refund_date)]);
                self.enricher
                    .save_return_reasons(self.store.as_ref(), &record.shop, &[detail], &fallbacks)
                    .await?;
            }
        }
        Ok(true)
    }

    async fn order_updated(&self, shop: &str, payload: OrderUpdatedPayload) -> Result<WebhookOutcome, WebhookError> {
        let order_id = payload
            .admin_graphql_api_id
            .clone()
            .unwrap_or_else(|| payload.id.to_gid("Order"));

        let Some(status) = payload.financial_status.filter(|s| !s.is_empty()) else {
            return Ok(WebhookOutcome::Ignored("no financial status in payload"));
        };

        let applied = self
            .store
            .update_order_financial_status(shop, &order_id, &status.to_ascii_uppercase())
            .await?;
        if !applied {
            debug!(order_id = %order_id, "order not synced yet; status update skipped");
        }
        Ok(WebhookOutcome::FinancialStatusUpdated { order_id, applied })
    }

    async fn bulk_operation_finished(
        &self,
        shop: &str,
        payload: BulkOperationFinishedPayload,
    ) -> Result<WebhookOutcome, WebhookError> {
        if !payload.kind.eq_ignore_ascii_case("query") {
            return Ok(WebhookOutcome::Ignored("not a query operation"));
        }

        match payload.status.to_ascii_lowercase().as_str() {
            "failed" | "canceled" | "cancelled" | "expired" => {
                warn!(operation_id = %payload.admin_graphql_api_id, status = %payload.status, "bulk export ended without a result");
                self.store.mark_sync_failed(shop).await?;
                Ok(WebhookOutcome::SyncFailed)
            }
            "completed" => {
                let tracked = self.store.shop(shop).await?.and_then(|s| s.sync_operation_id);
                if tracked.as_deref() != Some(payload.admin_graphql_api_id.as_str()) {
                    info!(operation_id = %payload.admin_graphql_api_id, "ignoring finish event for an untracked operation");
                    return Ok(WebhookOutcome::Ignored("operation is not the tracked sync"));
                }

                match self.clients.client_for(shop) {
                    Some(client) => {
                        let outcome = self.orchestrator.poll_status(shop, client.as_ref()).await?;
                        Ok(WebhookOutcome::SyncPolled(outcome))
                    }
                    None => {
                        self.store
                            .mark_operation_finished(shop, &payload.admin_graphql_api_id)
                            .await?;
                        Ok(WebhookOutcome::SyncMarkedCompleted)
                    }
                }
            }
            _ => Ok(WebhookOutcome::Ignored("operation still in progress")),
        }
    }
}
