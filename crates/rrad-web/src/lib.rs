//! HTTP surface: webhook intake, sync control and JSON reports.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rrad_adapters::ClientProvider;
use rrad_core::{SyncStatus, TrailingDays};
use rrad_reports::{ReportEngine, DEFAULT_TOP_PRODUCTS};
use rrad_sync::{StartSyncOutcome, SyncRuntime, WebhookError};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "rrad-web";

pub const TOPIC_HEADER: &str = "x-shopify-topic";
pub const SHOP_HEADER: &str = "x-shopify-shop-domain";

#[derive(Clone)]
pub struct AppState {
    pub runtime: SyncRuntime,
    pub reports: ReportEngine,
}

impl AppState {
    pub fn new(runtime: SyncRuntime) -> Self {
        let reports = ReportEngine::new(runtime.store.clone());
        Self { runtime, reports }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReportParams {
    days: Option<String>,
    limit: Option<usize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/webhooks", post(webhook_handler))
        .route("/api/shops/{shop}/sync", get(sync_status_handler).post(start_sync_handler))
        .route("/api/shops/{shop}/reports/{report}", get(report_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn port_from_env() -> u16 {
    std::env::var("RRAD_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn webhook_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let (Some(topic), Some(shop)) = (header_str(&headers, TOPIC_HEADER), header_str(&headers, SHOP_HEADER)) else {
        return json_error(StatusCode::BAD_REQUEST, "missing topic or shop header");
    };

    match state.runtime.ingestor.ingest_raw(topic, shop, &body).await {
        Ok(outcome) => {
            info!(topic, shop, ?outcome, "webhook handled");
            StatusCode::OK.into_response()
        }
        Err(err @ WebhookError::UnknownTopic(_)) => {
            warn!(topic, shop, "unhandled webhook topic");
            json_error(StatusCode::NOT_FOUND, &err.to_string())
        }
        Err(err @ WebhookError::Payload { .. }) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(err) => {
            error!(topic, shop, error = %err, "webhook processing failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "webhook processing failed")
        }
    }
}

/// Reports status, polling first when an export is in flight and the shop has a client.
async fn sync_status_handler(State(state): State<Arc<AppState>>, Path(shop): Path<String>) -> Response {
    let orchestrator = &state.runtime.orchestrator;
    let current = match orchestrator.sync_status(&shop).await {
        Ok(current) => current,
        Err(err) => return server_error(err),
    };

    let awaiting = current.operation_id.is_some() || current.status == SyncStatus::Running;
    if awaiting {
        if let Some(client) = state.runtime.clients.client_for(&shop) {
            if let Err(err) = orchestrator.poll_status(&shop, client.as_ref()).await {
                warn!(shop = %shop, error = %err, "poll on status read failed");
            }
        }
    }

    match orchestrator.sync_status(&shop).await {
        Ok(sync) => Json(sync).into_response(),
        Err(err) => server_error(err),
    }
}

async fn start_sync_handler(State(state): State<Arc<AppState>>, Path(shop): Path<String>) -> Response {
    let Some(client) = state.runtime.clients.client_for(&shop) else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "no api client configured for shop");
    };

    match state.runtime.orchestrator.start_sync(&shop, client.as_ref()).await {
        Ok(StartSyncOutcome::Started { operation_id }) => (
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "operationId": operation_id })),
        )
            .into_response(),
        Ok(StartSyncOutcome::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "error": "sync already in progress" })),
        )
            .into_response(),
        Ok(StartSyncOutcome::Rejected(errors)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "success": false, "errors": errors })),
        )
            .into_response(),
        Err(err) => server_error(err),
    }
}

async fn report_handler(
    State(state): State<Arc<AppState>>,
    Path((shop, report)): Path<(String, String)>,
    Query(params): Query<ReportParams>,
) -> Response {
    let days = TrailingDays::parse(params.days.as_deref());
    let limit = params.limit.unwrap_or(DEFAULT_TOP_PRODUCTS);
    let reports = &state.reports;

    let result = match report.as_str() {
        "dashboard" => reports.dashboard(&shop, days).await.map(|r| Json(r).into_response()),
        "top-products" => reports
            .top_products(&shop, days, limit)
            .await
            .map(|r| Json(r).into_response()),
        "refund-trend" => reports.refund_trend(&shop, days).await.map(|r| Json(r).into_response()),
        "product-refunds" => reports.product_refunds(&shop, days).await.map(|r| Json(r).into_response()),
        "return-reasons" => reports.return_reasons(&shop, days).await.map(|r| Json(r).into_response()),
        "return-reason-trend" => reports
            .return_reason_trend(&shop, days)
            .await
            .map(|r| Json(r).into_response()),
        "return-reasons-by-product" => reports
            .return_reasons_by_product(&shop, days)
            .await
            .map(|r| Json(r).into_response()),
        _ => return json_error(StatusCode::NOT_FOUND, "unknown report"),
    };

    result.unwrap_or_else(server_error)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}
