//! Scheduled expiry sweep for export artifacts.
//!
//! Ready exports carry a TTL deadline; a periodic task flips the ones past
//! it to `expired`. The sweeper is the only owner of the
//! `ready → expired` transition.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::server_kernel::ServerKernel;

/// Start the expiry sweep; runs every ten minutes.
pub async fn start_sweeper(kernel: Arc<ServerKernel>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweep_kernel = kernel.clone();
    let sweep_job = Job::new_async("0 */10 * * * *", move |_uuid, _lock| {
        let kernel = sweep_kernel.clone();
        Box::pin(async move {
            if let Err(e) = run_sweep(&kernel).await {
                tracing::error!(error = %e, "export expiry sweep failed");
            }
        })
    })?;
    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    tracing::info!("export expiry sweeper started (every 10 minutes)");
    Ok(scheduler)
}

async fn run_sweep(kernel: &ServerKernel) -> Result<()> {
    let now = kernel.clock.now_ms();
    let expired = kernel.store.expire_ready_jobs(now).await?;
    if expired > 0 {
        tracing::info!(count = expired, "expired export artifacts");
    }
    Ok(())
}
