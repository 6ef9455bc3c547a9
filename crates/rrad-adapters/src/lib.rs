//! Commerce platform API contracts, the Admin GraphQL client, record mapping
//! and the return-reason taxonomy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod graphql;
mod mapping;
mod reasons;
mod shopify;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use graphql::{
    BulkOperation, BulkOperationRef, BulkOperationStatus, RefundDetail, ReturnDetail, UserError,
    ORDERS_EXPORT_QUERY,
};
pub use mapping::{order_from_export, refund_from_detail, return_reasons_from_detail, ExportOrder};
pub use reasons::{MappedReason, ReasonRule, ReasonRulesFile, ReasonTaxonomy};
pub use shopify::{AdminClientConfig, ShopifyAdminClient};

pub const CRATE_NAME: &str = "rrad-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned http status {status}")]
    Status { status: u16, operation: String },
    #[error("{operation} returned graphql errors: {}", messages.join("; "))]
    Graphql {
        operation: String,
        messages: Vec<String>,
    },
    #[error("{operation} returned no data")]
    MissingData { operation: String },
    #[error("{0}")]
    Message(String),
}

/// Outcome of asking the origin to begin a bulk export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkStart {
    Accepted(BulkOperationRef),
    Rejected(Vec<UserError>),
}

/// The per-shop slice of the commerce platform API this system consumes.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    async fn start_bulk_export(&self, query: &str) -> Result<BulkStart, AdapterError>;

    /// `None` when the origin no longer knows the operation.
    async fn bulk_operation(&self, operation_id: &str) -> Result<Option<BulkOperation>, AdapterError>;

    async fn refund_detail(&self, refund_id: &str) -> Result<Option<RefundDetail>, AdapterError>;

    async fn return_detail(&self, return_id: &str) -> Result<Option<ReturnDetail>, AdapterError>;

    async fn shop_currency(&self) -> Result<Option<String>, AdapterError>;
}

/// Resolves an authenticated API client for a shop, if one is configured.
pub trait ClientProvider: Send + Sync {
    fn client_for(&self, shop: &str) -> Option<Arc<dyn CommerceApi>>;
}

/// Fixed shop → client table, typically built once from configured access tokens.
#[derive(Default, Clone)]
pub struct StaticClients {
    clients: HashMap<String, Arc<dyn CommerceApi>>,
}

impl StaticClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shop: impl Into<String>, client: Arc<dyn CommerceApi>) {
        self.clients.insert(shop.into(), client);
    }

    pub fn from_tokens(
        tokens: &[(String, String)],
        config: &AdminClientConfig,
    ) -> Result<Self, AdapterError> {
        let mut clients = Self::new();
        for (shop, token) in tokens {
            let client = ShopifyAdminClient::new(shop.clone(), token.clone(), config)?;
            clients.insert(shop.clone(), Arc::new(client));
        }
        Ok(clients)
    }

    pub fn shops(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl ClientProvider for StaticClients {
    fn client_for(&self, shop: &str) -> Option<Arc<dyn CommerceApi>> {
        self.clients.get(shop).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScriptedCommerceApi;

    #[test]
    fn static_clients_resolve_by_exact_shop_domain() {
        let mut clients = StaticClients::new();
        clients.insert("a.myshopify.com", Arc::new(ScriptedCommerceApi::new()));

        assert!(clients.client_for("a.myshopify.com").is_some());
        assert!(clients.client_for("b.myshopify.com").is_none());
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn tokens_build_admin_clients() {
        let clients = StaticClients::from_tokens(
            &[("a.myshopify.com".to_string(), "shpat_x".to_string())],
            &AdminClientConfig::default(),
        )
        .expect("clients");
        assert_eq!(clients.shops().collect::<Vec<_>>(), vec!["a.myshopify.com"]);
    }

    #[test]
    fn graphql_errors_render_all_messages() {
        let err = AdapterError::Graphql {
            operation: "RefundDetail@v2".into(),
            messages: vec!["Throttled".into(), "Access denied".into()],
        };
        assert_eq!(
            err.to_string(),
            "RefundDetail@v2 returned graphql errors: Throttled; Access denied"
        );
    }
}
