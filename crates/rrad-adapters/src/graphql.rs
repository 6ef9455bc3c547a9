//! Named, versioned GraphQL request descriptors for the commerce Admin API.
//!
//! Each operation pins its document, its variable set and the shape of the
//! `data` it returns, so transports never format queries by hand and business
//! code never touches untyped JSON.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};

pub trait GraphqlOperation {
    const NAME: &'static str;
    const VERSION: u32;
    const DOCUMENT: &'static str;
    type Variables: Serialize + Send + Sync;
    type Data: DeserializeOwned;

    fn descriptor() -> String {
        format!("{}@v{}", Self::NAME, Self::VERSION)
    }
}

#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a, V> {
    pub query: &'static str,
    #[serde(rename = "operationName")]
    pub operation_name: &'static str,
    pub variables: &'a V,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<D> {
    pub data: Option<D>,
    #[serde(default)]
    pub errors: Vec<GraphqlErrorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlErrorEntry {
    pub message: String,
}

/// Bulk export document: orders with their inline refund summaries.
///
/// Customer fields are deliberately not selected; nothing customer-identifying is persisted.
pub const ORDERS_EXPORT_QUERY: &str = r#"
{
  orders {
    edges {
      node {
        id
        name
        createdAt
        totalPriceSet { shopMoney { amount currencyCode } }
        displayFinancialStatus
        refunds {
          id
          createdAt
          note
          totalRefundedSet { shopMoney { amount currencyCode } }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    #[serde(default)]
    pub amount: Decimal,
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyBag {
    pub shop_money: Option<Money>,
}

impl MoneyBag {
    pub fn amount(bag: Option<&MoneyBag>) -> Decimal {
        bag.and_then(|b| b.shop_money.as_ref())
            .map(|m| m.amount)
            .unwrap_or_default()
    }

    pub fn currency(bag: Option<&MoneyBag>) -> Option<&str> {
        bag.and_then(|b| b.shop_money.as_ref())
            .and_then(|m| m.currency_code.as_deref())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<T>>,
}

impl<T> Connection<T> {
    pub fn nodes(conn: Option<&Connection<T>>) -> impl Iterator<Item = &T> {
        conn.into_iter().flat_map(|c| c.edges.iter().map(|e| &e.node))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub node: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkOperationStatus {
    Created,
    Running,
    Completed,
    Canceling,
    Canceled,
    Failed,
    Expired,
    #[serde(other)]
    Unknown,
}

impl BulkOperationStatus {
    /// Upstream will never produce a result for this operation.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled | Self::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperation {
    pub id: String,
    pub status: BulkOperationStatus,
    pub error_code: Option<String>,
    #[serde(default, deserialize_with = "count_from_string_or_number")]
    pub object_count: Option<u64>,
    pub url: Option<String>,
    pub partial_data_url: Option<String>,
}

// UnsignedInt64 arrives as a JSON string.
fn count_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationRef {
    pub id: String,
    pub status: BulkOperationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

pub struct StartBulkExport;

#[derive(Debug, Serialize)]
pub struct StartBulkExportVariables {
    pub query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBulkExportData {
    pub bulk_operation_run_query: Option<BulkRunPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRunPayload {
    pub bulk_operation: Option<BulkOperationRef>,
    #[serde(default)]
    pub user_errors: Vec<UserError>,
}

impl GraphqlOperation for StartBulkExport {
    const NAME: &'static str = "StartBulkQuery";
    const VERSION: u32 = 1;
    const DOCUMENT: &'static str = r#"
mutation StartBulkQuery($query: String!) {
  bulkOperationRunQuery(query: $query) {
    bulkOperation { id status }
    userErrors { field message }
  }
}
"#;
    type Variables = StartBulkExportVariables;
    type Data = StartBulkExportData;
}

pub struct PollBulkOperation;

#[derive(Debug, Serialize)]
pub struct IdVariables {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct NodeData<T> {
    pub node: Option<T>,
}

impl GraphqlOperation for PollBulkOperation {
    const NAME: &'static str = "PollBulkOperation";
    const VERSION: u32 = 1;
    const DOCUMENT: &'static str = r#"
query PollBulkOperation($id: ID!) {
  node(id: $id) {
    ... on BulkOperation {
      id
      status
      errorCode
      objectCount
      url
      partialDataUrl
    }
  }
}
"#;
    type Variables = IdVariables;
    type Data = NodeData<BulkOperation>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDetail {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub total_refunded_set: Option<MoneyBag>,
    pub order: Option<OrderRef>,
    #[serde(rename = "return")]
    pub linked_return: Option<NodeRef>,
    pub refund_line_items: Option<Connection<RefundLineItemNode>>,
    pub order_adjustments: Option<Connection<OrderAdjustmentNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundLineItemNode {
    pub quantity: Option<u32>,
    pub restock_type: Option<String>,
    pub subtotal_set: Option<MoneyBag>,
    pub line_item: Option<LineItemRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAdjustmentNode {
    pub reason: Option<String>,
    pub amount_set: Option<MoneyBag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemRef {
    pub title: Option<String>,
    pub sku: Option<String>,
    pub product: Option<ProductRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: Option<String>,
    pub title: Option<String>,
}

pub struct RefundDetailQuery;

impl GraphqlOperation for RefundDetailQuery {
    const NAME: &'static str = "RefundDetail";
    const VERSION: u32 = 2;
    const DOCUMENT: &'static str = r#"
query RefundDetail($id: ID!) {
  node(id: $id) {
    ... on Refund {
      id
      createdAt
      note
      totalRefundedSet { shopMoney { amount currencyCode } }
      order { id name }
      return { id }
      refundLineItems(first: 50) {
        edges {
          node {
            quantity
            restockType
            subtotalSet { shopMoney { amount } }
            lineItem { title sku }
          }
        }
      }
      orderAdjustments(first: 10) {
        edges {
          node {
            reason
            amountSet { shopMoney { amount } }
          }
        }
      }
    }
  }
}
"#;
    type Variables = IdVariables;
    type Data = NodeData<RefundDetail>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnDetail {
    pub id: String,
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub order: Option<OrderRef>,
    pub return_line_items: Option<Connection<ReturnLineItemNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnLineItemNode {
    pub id: Option<String>,
    pub quantity: Option<u32>,
    pub return_reason_note: Option<String>,
    pub return_reason_definition: Option<ReasonDefinition>,
    pub fulfillment_line_item: Option<FulfillmentLineItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonDefinition {
    pub handle: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentLineItem {
    pub line_item: Option<LineItemRef>,
}

pub struct ReturnDetailQuery;

#[derive(Debug, Deserialize)]
pub struct ReturnData {
    #[serde(rename = "return")]
    pub detail: Option<ReturnDetail>,
}

impl GraphqlOperation for ReturnDetailQuery {
    const NAME: &'static str = "ReturnDetail";
    const VERSION: u32 = 1;
    const DOCUMENT: &'static str = r#"
query ReturnDetail($id: ID!) {
  return(id: $id) {
    id
    name
    createdAt
    order { id name }
    returnLineItems(first: 50) {
      edges {
        node {
          ... on ReturnLineItem {
            id
            quantity
            returnReasonNote
            returnReasonDefinition { handle name }
            fulfillmentLineItem {
              lineItem { title sku product { id title } }
            }
          }
        }
      }
    }
  }
}
"#;
    type Variables = IdVariables;
    type Data = ReturnData;
}

pub struct ShopCurrencyQuery;

#[derive(Debug, Serialize)]
pub struct NoVariables {}

#[derive(Debug, Deserialize)]
pub struct ShopCurrencyData {
    pub shop: Option<ShopCurrencyNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopCurrencyNode {
    pub currency_code: Option<String>,
}

impl GraphqlOperation for ShopCurrencyQuery {
    const NAME: &'static str = "ShopCurrency";
    const VERSION: u32 = 1;
    const DOCUMENT: &'static str = r#"
query ShopCurrency {
  shop { currencyCode }
}
"#;
    type Variables = NoVariables;
    type Data = ShopCurrencyData;
}
