//! Ingestion side of Refund Radar: bulk sync orchestration, detail
//! enrichment and webhook handling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rrad_adapters::{AdapterError, AdminClientConfig, ClientProvider, ReasonTaxonomy, StaticClients};
use rrad_storage::{connect_store, FetchError, HttpClientConfig, HttpFetcher, RecordStore, StoreError};
use thiserror::Error;
use tokio_cron_scheduler::JobScheduler;
use tracing::info;

mod batch;
mod enrich;
mod jsonl;
mod orchestrator;
mod scheduler;
mod webhook;

pub use batch::{run_in_batches, BatchPolicy};
pub use enrich::DetailEnricher;
pub use jsonl::{parse_jsonl, ExportRecord};
pub use orchestrator::{BulkSyncOrchestrator, PollOutcome, StartSyncOutcome, SyncReport};
pub use scheduler::{build_poll_scheduler, poll_awaiting_shops, PollSweep};
pub use webhook::{WebhookError, WebhookIngestor, WebhookOutcome, WebhookTopic};

pub const CRATE_NAME: &str = "rrad-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Origin(#[from] AdapterError),
    #[error("downloading bulk export: {0}")]
    Download(#[from] FetchError),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub api_version: String,
    pub access_tokens: Vec<(String, String)>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub detail_concurrency: usize,
    pub detail_batch_delay_ms: u64,
    pub reason_rules: Option<PathBuf>,
    pub scheduler_enabled: bool,
    pub poll_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "memory://".to_string(),
            api_version: "2025-07".to_string(),
            access_tokens: Vec::new(),
            http_timeout_secs: 30,
            user_agent: "refund-radar/0.1".to_string(),
            detail_concurrency: 4,
            detail_batch_delay_ms: 500,
            reason_rules: None,
            scheduler_enabled: false,
            poll_cron: "0 * * * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            api_version: get("SHOPIFY_API_VERSION").unwrap_or(defaults.api_version),
            access_tokens: get("SHOPIFY_ACCESS_TOKENS")
                .map(|v| parse_access_tokens(&v))
                .unwrap_or_default(),
            http_timeout_secs: get("RRAD_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: get("RRAD_USER_AGENT").unwrap_or(defaults.user_agent),
            detail_concurrency: get("RRAD_DETAIL_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.detail_concurrency),
            detail_batch_delay_ms: get("RRAD_DETAIL_BATCH_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.detail_batch_delay_ms),
            reason_rules: get("RRAD_REASON_RULES")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            scheduler_enabled: get("RRAD_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            poll_cron: get("RRAD_POLL_CRON").unwrap_or(defaults.poll_cron),
        }
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            batch_size: self.detail_concurrency.max(1),
            inter_batch_delay: Duration::from_millis(self.detail_batch_delay_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// `shop=token` pairs separated by commas. Malformed pairs are ignored.
pub fn parse_access_tokens(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (shop, token) = pair.split_once('=')?;
            let (shop, token) = (shop.trim(), token.trim());
            (!shop.is_empty() && !token.is_empty()).then(|| (shop.to_string(), token.to_string()))
        })
        .collect()
}

/// Fully wired ingestion services sharing one store.
#[derive(Clone)]
pub struct SyncRuntime {
    pub config: SyncConfig,
    pub store: Arc<dyn RecordStore>,
    pub clients: Arc<dyn ClientProvider>,
    pub enricher: Arc<DetailEnricher>,
    pub orchestrator: Arc<BulkSyncOrchestrator>,
    pub ingestor: Arc<WebhookIngestor>,
}

impl SyncRuntime {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        clients: Arc<dyn ClientProvider>,
        downloader: Arc<dyn rrad_storage::ExportDownloader>,
        enricher: DetailEnricher,
    ) -> Self {
        let enricher = Arc::new(enricher);
        let orchestrator = Arc::new(BulkSyncOrchestrator::new(
            store.clone(),
            downloader,
            enricher.clone(),
        ));
        let ingestor = Arc::new(WebhookIngestor::new(
            store.clone(),
            clients.clone(),
            orchestrator.clone(),
            enricher.clone(),
        ));
        Self {
            config,
            store,
            clients,
            enricher,
            orchestrator,
            ingestor,
        }
    }

    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let store = connect_store(&config.database_url)
            .await
            .context("opening record store")?;

        let taxonomy = match &config.reason_rules {
            Some(path) => ReasonTaxonomy::with_rules_file(path)?,
            None => ReasonTaxonomy::built_in(),
        };

        let clients = StaticClients::from_tokens(
            &config.access_tokens,
            &AdminClientConfig {
                api_version: config.api_version.clone(),
                timeout: config.http_timeout(),
                user_agent: Some(config.user_agent.clone()),
            },
        )
        .context("building admin api clients")?;
        info!(shops = clients.len(), "admin api clients configured");

        let downloader = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
            ..HttpClientConfig::default()
        })
        .context("building export downloader")?;

        let enricher = DetailEnricher::new(config.batch_policy(), taxonomy);
        Ok(Self::new(
            config,
            store,
            Arc::new(clients),
            Arc::new(downloader),
            enricher,
        ))
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }
        let sched = build_poll_scheduler(
            self.orchestrator.clone(),
            self.clients.clone(),
            &self.config.poll_cron,
        )
        .await?;
        Ok(Some(sched))
    }
}
