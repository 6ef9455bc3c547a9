use std::sync::Arc;
use std::time::Duration;

use rrad_adapters::fake::{completed_operation, failed_operation, ScriptedCommerceApi, ScriptedExports};
use rrad_adapters::{BulkOperationStatus, CommerceApi, StaticClients};
use rrad_core::{ReasonCategory, SyncStatus};
use rrad_storage::{MemoryRecordStore, RecordStore};
use rrad_sync::{
    BatchPolicy, DetailEnricher, PollOutcome, StartSyncOutcome, SyncConfig, SyncRuntime, WebhookTopic,
};
use rust_decimal::Decimal;
use serde_json::json;

const SHOP: &str = "outfitters.myshopify.com";
const EXPORT_URL: &str = "https://storage.example.com/bulk/1.jsonl?signature=abc";

struct Harness {
    store: Arc<MemoryRecordStore>,
    exports: Arc<ScriptedExports>,
    api: Arc<ScriptedCommerceApi>,
    runtime: SyncRuntime,
}

fn harness(api: ScriptedCommerceApi) -> Harness {
    let store = Arc::new(MemoryRecordStore::new());
    let exports = Arc::new(ScriptedExports::new());
    let api = Arc::new(api);
    let mut clients = StaticClients::new();
    clients.insert(SHOP, api.clone() as Arc<dyn CommerceApi>);

    let runtime = SyncRuntime::new(
        SyncConfig::default(),
        store.clone(),
        Arc::new(clients),
        exports.clone(),
        DetailEnricher::new(
            BatchPolicy {
                batch_size: 2,
                inter_batch_delay: Duration::ZERO,
            },
            Default::default(),
        ),
    );
    Harness {
        store,
        exports,
        api,
        runtime,
    }
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[tokio::test]
async fn concurrent_starts_admit_exactly_one() {
    let h = harness(ScriptedCommerceApi::new().with_start_delay(Duration::from_millis(20)));
    let orchestrator = h.runtime.orchestrator.clone();

    let (a, b) = tokio::join!(
        orchestrator.start_sync(SHOP, h.api.as_ref()),
        orchestrator.start_sync(SHOP, h.api.as_ref()),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let started: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            StartSyncOutcome::Started { operation_id } => Some(operation_id.clone()),
            _ => None,
        })
        .collect();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, StartSyncOutcome::AlreadyRunning))
        .count();

    assert_eq!(started.len(), 1);
    assert_eq!(rejected, 1);
    assert_eq!(h.api.start_calls().await, 1);
    let shop = h.store.shop(SHOP).await.unwrap().unwrap();
    assert_eq!(shop.sync_operation_id.as_deref(), Some(started[0].as_str()));
}

#[tokio::test]
async fn completed_export_is_ingested_end_to_end() {
    let h = harness(ScriptedCommerceApi::new());
    let orchestrator = h.runtime.orchestrator.clone();

    let StartSyncOutcome::Started { operation_id } =
        orchestrator.start_sync(SHOP, h.api.as_ref()).await.unwrap()
    else {
        panic!("expected start");
    };

    let lines = [
        json!({
            "id": "gid://shopify/Order/1001", "name": "#1001", "createdAt": "2026-03-01T10:00:00Z",
            "totalPriceSet": { "shopMoney": { "amount": "200.00", "currencyCode": "CAD" } },
            "displayFinancialStatus": "PARTIALLY_REFUNDED",
            "refunds": [ { "id": "gid://shopify/Refund/1" } ]
        }),
        json!({
            "id": "gid://shopify/Order/1002", "name": "#1002", "createdAt": "2026-03-02T10:00:00Z",
            "totalPriceSet": { "shopMoney": { "amount": "80.00", "currencyCode": "CAD" } },
            "refunds": []
        }),
        json!({ "id": "gid://shopify/Refund/2", "__parentId": "gid://shopify/Order/1002" }),
    ];
    let mut body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    body.push_str("{truncated line\n\n");
    h.exports.serve(EXPORT_URL, body).await;

    h.api
        .add_refund(
            serde_json::from_value(json!({
                "id": "gid://shopify/Refund/1",
                "createdAt": "2026-03-05T12:00:00Z",
                "totalRefundedSet": { "shopMoney": { "amount": "50.00" } },
                "order": { "id": "gid://shopify/Order/1001", "name": "#1001" },
                "return": { "id": "gid://shopify/Return/9" },
                "refundLineItems": { "edges": [
                    { "node": { "quantity": 1, "subtotalSet": { "shopMoney": { "amount": "29.99" } },
                                "lineItem": { "title": "Trail Tee", "sku": "APP-TSH-001" } } },
                    { "node": { "quantity": 1, "subtotalSet": { "shopMoney": { "amount": "20.01" } },
                                "lineItem": { "title": "Trail Socks" } } }
                ]}
            }))
            .unwrap(),
        )
        .await;
    // Refund/2 lookup fails; it is dropped without failing the sync.
    h.api.fail_detail("gid://shopify/Refund/2").await;
    h.api
        .add_return(
            serde_json::from_value(json!({
                "id": "gid://shopify/Return/9",
                "createdAt": "2026-03-04T09:00:00Z",
                "order": { "id": "gid://shopify/Order/1001" },
                "returnLineItems": { "edges": [
                    { "node": { "id": "gid://shopify/ReturnLineItem/1", "quantity": 1,
                                "returnReasonDefinition": { "handle": "too-small", "name": "Size too small" },
                                "fulfillmentLineItem": { "lineItem": { "title": "Trail Tee", "sku": "APP-TSH-001" } } } }
                ]}
            }))
            .unwrap(),
        )
        .await;

    h.api
        .set_operation(completed_operation(&operation_id, Some(EXPORT_URL), 3))
        .await;

    let PollOutcome::Completed(report) = orchestrator.poll_status(SHOP, h.api.as_ref()).await.unwrap() else {
        panic!("expected completed ingestion");
    };
    assert_eq!(report.orders_saved, 2);
    assert_eq!(report.refund_ids, 2);
    assert_eq!(report.refunds_saved, 1);
    assert_eq!(report.return_reasons_saved, 1);
    assert_eq!(report.currency, "CAD");
    assert_eq!(h.exports.downloads().await, vec![EXPORT_URL.to_string()]);

    let shop = h.store.shop(SHOP).await.unwrap().unwrap();
    assert_eq!(shop.sync_status, SyncStatus::Completed);
    assert_eq!(shop.sync_operation_id, None);
    assert_eq!(shop.currency, "CAD");
    assert!(shop.last_sync_at.is_some());

    let since = "2026-01-01T00:00:00Z".parse().unwrap();
    let orders = h.store.orders_since(SHOP, since).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().any(|o| o.financial_status == "PAID"));

    let refunds = h.store.refunds_since(SHOP, since).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, dec("50.00"));
    assert_eq!(refunds[0].currency, "CAD");
    assert_eq!(refunds[0].return_id.as_deref(), Some("gid://shopify/Return/9"));

    let reasons = h.store.return_reasons_since(SHOP, since).await.unwrap();
    assert_eq!(reasons[0].category, ReasonCategory::Sizing);
    assert_eq!(reasons[0].product_title, "Trail Tee");
}

#[tokio::test]
async fn canceled_export_fails_the_sync_but_keeps_last_sync_time() {
    let h = harness(ScriptedCommerceApi::new());
    let orchestrator = h.runtime.orchestrator.clone();

    // a previous, successful empty sync
    let StartSyncOutcome::Started { operation_id } =
        orchestrator.start_sync(SHOP, h.api.as_ref()).await.unwrap()
    else {
        panic!("expected start");
    };
    h.api.set_operation(completed_operation(&operation_id, None, 0)).await;
    assert_eq!(orchestrator.poll_status(SHOP, h.api.as_ref()).await.unwrap(), PollOutcome::Empty);
    let previous = h.store.shop(SHOP).await.unwrap().unwrap().last_sync_at;
    assert!(previous.is_some());

    let StartSyncOutcome::Started { operation_id } =
        orchestrator.start_sync(SHOP, h.api.as_ref()).await.unwrap()
    else {
        panic!("expected re-sync start");
    };
    h.api
        .set_operation(failed_operation(&operation_id, BulkOperationStatus::Canceled, "ACCESS_DENIED"))
        .await;

    let outcome = orchestrator.poll_status(SHOP, h.api.as_ref()).await.unwrap();
    assert!(matches!(outcome, PollOutcome::Failed { status: BulkOperationStatus::Canceled, .. }));

    let shop = h.store.shop(SHOP).await.unwrap().unwrap();
    assert_eq!(shop.sync_status, SyncStatus::Failed);
    assert_eq!(shop.sync_operation_id, None);
    assert_eq!(shop.last_sync_at, previous);
}

#[tokio::test]
async fn redelivered_refund_webhook_converges_to_one_record() {
    let h = harness(ScriptedCommerceApi::new());
    let ingestor = h.runtime.ingestor.clone();

    let first = json!({
        "id": 777, "order_id": 1001, "created_at": "2026-03-06T08:00:00Z",
        "transactions": [ { "kind": "refund", "status": "success", "amount": "15.00" } ],
        "refund_line_items": []
    });
    let mut second = first.clone();
    second["note"] = json!("adjusted");
    second["transactions"] = json!([ { "kind": "refund", "status": "success", "amount": "17.50" } ]);

    ingestor.ingest(WebhookTopic::RefundsCreate, SHOP, &first).await.unwrap();
    ingestor.ingest(WebhookTopic::RefundsCreate, SHOP, &second).await.unwrap();

    let refunds = h
        .store
        .refunds_since(SHOP, "2026-01-01T00:00:00Z".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(h.store.refund_count(SHOP).await, 1);
    assert_eq!(refunds[0].amount, dec("17.50"));
    assert_eq!(refunds[0].note.as_deref(), Some("adjusted"));
}

#[tokio::test]
async fn finish_webhook_with_client_ingests_directly() {
    let h = harness(ScriptedCommerceApi::new());
    let orchestrator = h.runtime.orchestrator.clone();
    let StartSyncOutcome::Started { operation_id } =
        orchestrator.start_sync(SHOP, h.api.as_ref()).await.unwrap()
    else {
        panic!("expected start");
    };
    h.exports
        .serve(EXPORT_URL, "{\"id\":\"gid://shopify/Order/5\",\"createdAt\":\"2026-03-01T00:00:00Z\"}\n")
        .await;
    h.api
        .set_operation(completed_operation(&operation_id, Some(EXPORT_URL), 1))
        .await;

    let event = json!({ "admin_graphql_api_id": operation_id, "status": "completed", "type": "query" });
    let outcome = h
        .runtime
        .ingestor
        .ingest_raw("BULK_OPERATIONS_FINISH", SHOP, event.to_string().as_bytes())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        rrad_sync::WebhookOutcome::SyncPolled(PollOutcome::Completed(_))
    ));
    assert_eq!(
        h.store.shop(SHOP).await.unwrap().unwrap().sync_status,
        SyncStatus::Completed
    );
}
