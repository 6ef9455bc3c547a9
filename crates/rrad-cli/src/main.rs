use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rrad_adapters::ClientProvider;
use rrad_core::TrailingDays;
use rrad_reports::ReportEngine;
use rrad_storage::PgRecordStore;
use rrad_sync::{StartSyncOutcome, SyncConfig, SyncRuntime};
use rrad_web::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "rrad-cli")]
#[command(about = "Refund Radar command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server, plus the poll scheduler when enabled.
    Serve {
        /// Defaults to `RRAD_WEB_PORT`, then 8000.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Apply database migrations.
    Migrate,
    /// Start a bulk export for a shop.
    Sync { shop: String },
    /// Poll a shop's in-flight export once.
    Poll { shop: String },
    /// Print the dashboard metrics for a shop as JSON.
    Report {
        shop: String,
        #[arg(long)]
        days: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RRAD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let runtime = SyncRuntime::from_config(config).await?;
            let scheduler = runtime.maybe_build_scheduler().await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting poll scheduler")?;
                info!(cron = %runtime.config.poll_cron, "poll scheduler started");
            }
            let port = port.unwrap_or_else(rrad_web::port_from_env);
            rrad_web::serve(AppState::new(runtime), port).await?;
        }
        Commands::Migrate => {
            let store = PgRecordStore::connect(&config.database_url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Sync { shop } => {
            let runtime = SyncRuntime::from_config(config).await?;
            let Some(client) = runtime.clients.client_for(&shop) else {
                bail!("no access token configured for {shop}");
            };
            match runtime.orchestrator.start_sync(&shop, client.as_ref()).await? {
                StartSyncOutcome::Started { operation_id } => {
                    println!("sync started: shop={shop} operation={operation_id}");
                }
                StartSyncOutcome::AlreadyRunning => println!("sync already running for {shop}"),
                StartSyncOutcome::Rejected(errors) => {
                    let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
                    bail!("bulk export rejected: {}", messages.join("; "));
                }
            }
        }
        Commands::Poll { shop } => {
            let runtime = SyncRuntime::from_config(config).await?;
            let Some(client) = runtime.clients.client_for(&shop) else {
                bail!("no access token configured for {shop}");
            };
            let outcome = runtime.orchestrator.poll_status(&shop, client.as_ref()).await?;
            println!("poll: shop={shop} outcome={outcome:?}");
        }
        Commands::Report { shop, days } => {
            let runtime = SyncRuntime::from_config(config).await?;
            let engine = ReportEngine::new(runtime.store.clone());
            let metrics = engine.dashboard(&shop, TrailingDays::parse(days.as_deref())).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    Ok(())
}
