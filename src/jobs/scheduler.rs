//! Periodic job dispatch

use std::time::Duration;

use chrono::Utc;
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};

use super::{queue::JobQueue, Job};
use crate::config::JobsConfig;

/// How often due retries are moved back to the ready list
const PROMOTE_INTERVAL: Duration = Duration::from_secs(5);

/// Enqueue the periodic jobs and promote due retries until shutdown.
///
/// Both jobs fire once at startup, then on their configured interval.
pub async fn run(queue: JobQueue, config: JobsConfig, mut shutdown: watch::Receiver<bool>) {
    let mut overdue = interval(Duration::from_secs(config.overdue_scan_interval_secs.max(1)));
    let mut sweep = interval(Duration::from_secs(config.session_sweep_interval_secs.max(1)));
    let mut promote = interval(PROMOTE_INTERVAL);
    for timer in [&mut overdue, &mut sweep, &mut promote] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    tracing::info!(
        overdue_every_secs = config.overdue_scan_interval_secs,
        sweep_every_secs = config.session_sweep_interval_secs,
        "Job scheduler started"
    );

    loop {
        tokio::select! {
            _ = overdue.tick() => dispatch(&queue, Job::CheckOverdueBorrowings).await,
            _ = sweep.tick() => dispatch(&queue, Job::TrackExpiredSessions).await,
            _ = promote.tick() => {
                match queue.promote_due(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!(promoted = n, "Promoted delayed jobs"),
                    Err(e) => tracing::warn!(error = %e, "Failed to promote delayed jobs"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Job scheduler stopped");
}

async fn dispatch(queue: &JobQueue, job: Job) {
    let name = job.name();
    if let Err(e) = queue.enqueue(job).await {
        tracing::warn!(job = name, error = %e, "Failed to enqueue job");
    }
}
