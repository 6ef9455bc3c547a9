use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use rrad_adapters::ClientProvider;

use crate::orchestrator::{BulkSyncOrchestrator, PollOutcome};

/// Result of one sweep over the shops awaiting a poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSweep {
    pub polled: usize,
    pub finished: usize,
    pub without_client: usize,
    pub errors: usize,
}

/// Poll every shop with an in-flight export. One shop's failure does not stop the rest.
pub async fn poll_awaiting_shops(
    orchestrator: &BulkSyncOrchestrator,
    clients: &dyn ClientProvider,
) -> Result<PollSweep> {
    let shops = orchestrator
        .shops_awaiting_poll()
        .await
        .context("listing shops awaiting poll")?;

    let mut sweep = PollSweep::default();
    for shop in shops {
        let Some(client) = clients.client_for(&shop.id) else {
            sweep.without_client += 1;
            continue;
        };

        sweep.polled += 1;
        match orchestrator.poll_status(&shop.id, client.as_ref()).await {
            Ok(PollOutcome::Completed(_) | PollOutcome::Empty | PollOutcome::Failed { .. }) => {
                sweep.finished += 1;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(shop = %shop.id, error = %err, "scheduled poll failed");
                sweep.errors += 1;
            }
        }
    }
    Ok(sweep)
}

/// Cron-driven poll loop; `cron` uses the seconds-first six-field form.
pub async fn build_poll_scheduler(
    orchestrator: Arc<BulkSyncOrchestrator>,
    clients: Arc<dyn ClientProvider>,
    cron: &str,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let orchestrator = orchestrator.clone();
        let clients = clients.clone();
        Box::pin(async move {
            match poll_awaiting_shops(&orchestrator, clients.as_ref()).await {
                Ok(sweep) if sweep.polled > 0 || sweep.without_client > 0 => {
                    info!(?sweep, "scheduled poll sweep finished");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled poll sweep failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
