use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, debug_span, Instrument};

use crate::graphql::{
    GraphqlOperation, GraphqlRequest, GraphqlResponse, IdVariables, NoVariables, PollBulkOperation,
    RefundDetailQuery, ReturnDetailQuery, ShopCurrencyQuery, StartBulkExport,
    StartBulkExportVariables,
};
use crate::{AdapterError, BulkOperation, BulkStart, CommerceApi, RefundDetail, ReturnDetail};

#[derive(Debug, Clone)]
pub struct AdminClientConfig {
    pub api_version: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for AdminClientConfig {
    fn default() -> Self {
        Self {
            api_version: "2025-07".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// Admin GraphQL client bound to one shop and its offline access token.
#[derive(Debug, Clone)]
pub struct ShopifyAdminClient {
    shop: String,
    access_token: String,
    api_version: String,
    client: reqwest::Client,
}

impl ShopifyAdminClient {
    pub fn new(
        shop: impl Into<String>,
        access_token: impl Into<String>,
        config: &AdminClientConfig,
    ) -> Result<Self, AdapterError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            shop: shop.into(),
            access_token: access_token.into(),
            api_version: config.api_version.clone(),
            client: builder.build()?,
        })
    }

    pub fn shop(&self) -> &str {
        &self.shop
    }

    pub fn endpoint(&self) -> String {
        format!(
            "https://{}/admin/api/{}/graphql.json",
            self.shop, self.api_version
        )
    }

    pub async fn execute<O: GraphqlOperation>(
        &self,
        variables: &O::Variables,
    ) -> Result<O::Data, AdapterError> {
        let span = debug_span!("graphql", operation = %O::descriptor(), shop = %self.shop);
        async {
            let request = GraphqlRequest {
                query: O::DOCUMENT,
                operation_name: O::NAME,
                variables,
            };

            let resp = self
                .client
                .post(self.endpoint())
                .header("X-Shopify-Access-Token", &self.access_token)
                .json(&request)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(AdapterError::Status {
                    status: status.as_u16(),
                    operation: O::descriptor(),
                });
            }

            let body: GraphqlResponse<O::Data> = resp.json().await?;
            if !body.errors.is_empty() {
                return Err(AdapterError::Graphql {
                    operation: O::descriptor(),
                    messages: body.errors.into_iter().map(|e| e.message).collect(),
                });
            }

            debug!("graphql response received");
            body.data.ok_or_else(|| AdapterError::MissingData {
                operation: O::descriptor(),
            })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl CommerceApi for ShopifyAdminClient {
    async fn start_bulk_export(&self, query: &str) -> Result<BulkStart, AdapterError> {
        let data = self
            .execute::<StartBulkExport>(&StartBulkExportVariables {
                query: query.to_string(),
            })
            .await?;

        let payload = data
            .bulk_operation_run_query
            .ok_or_else(|| AdapterError::MissingData {
                operation: StartBulkExport::descriptor(),
            })?;

        if !payload.user_errors.is_empty() {
            return Ok(BulkStart::Rejected(payload.user_errors));
        }

        payload
            .bulk_operation
            .map(BulkStart::Accepted)
            .ok_or_else(|| AdapterError::MissingData {
                operation: StartBulkExport::descriptor(),
            })
    }

    async fn bulk_operation(&self, operation_id: &str) -> Result<Option<BulkOperation>, AdapterError> {
        let data = self
            .execute::<PollBulkOperation>(&IdVariables {
                id: operation_id.to_string(),
            })
            .await?;
        Ok(data.node)
    }

    async fn refund_detail(&self, refund_id: &str) -> Result<Option<RefundDetail>, AdapterError> {
        let data = self
            .execute::<RefundDetailQuery>(&IdVariables {
                id: refund_id.to_string(),
            })
            .await?;
        Ok(data.node)
    }

    async fn return_detail(&self, return_id: &str) -> Result<Option<ReturnDetail>, AdapterError> {
        let data = self
            .execute::<ReturnDetailQuery>(&IdVariables {
                id: return_id.to_string(),
            })
            .await?;
        Ok(data.detail)
    }

    async fn shop_currency(&self) -> Result<Option<String>, AdapterError> {
        let data = self.execute::<ShopCurrencyQuery>(&NoVariables {}).await?;
        Ok(data
            .shop
            .and_then(|s| s.currency_code)
            .filter(|c| !c.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_shop_domain_and_pinned_version() {
        let client = ShopifyAdminClient::new(
            "demo.myshopify.com",
            "shpat_test",
            &AdminClientConfig {
                api_version: "2025-07".into(),
                ..AdminClientConfig::default()
            },
        )
        .expect("client");
        assert_eq!(
            client.endpoint(),
            "https://demo.myshopify.com/admin/api/2025-07/graphql.json"
        );
        assert_eq!(client.shop(), "demo.myshopify.com");
    }

    #[test]
    fn request_body_carries_operation_name_and_variables() {
        let vars = IdVariables {
            id: "gid://shopify/Refund/9".into(),
        };
        let request = GraphqlRequest {
            query: RefundDetailQuery::DOCUMENT,
            operation_name: RefundDetailQuery::NAME,
            variables: &vars,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["operationName"], "RefundDetail");
        assert_eq!(value["variables"]["id"], "gid://shopify/Refund/9");
    }
}
