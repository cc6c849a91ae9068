//! Worker pool consuming the job queue

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::aio::MultiplexedConnection;
use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument;

use super::{next_step, queue::JobQueue, queue::Reserved, Job, RetryDecision};
use crate::{config::JobsConfig, error::AppResult, services::Services};

/// Seconds a worker blocks on an empty queue before checking for shutdown
const RESERVE_TIMEOUT_SECS: u64 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Run one job against the services
pub async fn execute(services: &Services, job: &Job) -> AppResult<()> {
    match job {
        Job::CheckOverdueBorrowings => {
            services
                .borrowings
                .scan_overdue(Utc::now().date_naive())
                .await?;
        }
        Job::TrackExpiredSessions => {
            let expired = services.payments.sweep_expired_sessions().await?;
            tracing::info!(expired, "Expired session sweep done");
        }
    }
    Ok(())
}

pub struct WorkerPool {
    queue: JobQueue,
    services: Arc<Services>,
    config: JobsConfig,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, services: Arc<Services>, config: JobsConfig) -> Self {
        Self {
            queue,
            services,
            config,
        }
    }

    /// Spawn `config.workers` workers; they stop once `shutdown` turns true
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: self.queue.clone(),
                    services: self.services.clone(),
                    config: self.config.clone(),
                };
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    queue: JobQueue,
    services: Arc<Services>,
    config: JobsConfig,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = self.id, "Job worker started");
        let mut conn: Option<MultiplexedConnection> = None;

        while !*shutdown.borrow() {
            if conn.is_none() {
                match self.queue.redis().get_connection().await {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        tracing::warn!(worker = self.id, error = %e, "Queue unavailable");
                        tokio::select! {
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            _ = shutdown.changed() => {}
                        }
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else {
                continue;
            };

            let reserved = tokio::select! {
                reserved = self.queue.reserve(c, RESERVE_TIMEOUT_SECS) => reserved,
                _ = shutdown.changed() => break,
            };

            match reserved {
                Ok(Some(reserved)) => {
                    if let Err(e) = self.process(c, reserved).await {
                        tracing::warn!(worker = self.id, error = %e, "Queue bookkeeping failed");
                        conn = None;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "Failed to reserve job");
                    conn = None;
                }
            }
        }

        tracing::info!(worker = self.id, "Job worker stopped");
    }

    /// Execute a reserved job, then acknowledge, retry or dead-letter it.
    ///
    /// Errors returned here come from Redis only; job failures are handled.
    async fn process(&self, conn: &mut MultiplexedConnection, reserved: Reserved) -> AppResult<()> {
        let envelope = &reserved.envelope;
        let span = tracing::info_span!("job", worker = self.id, attempt = envelope.attempts + 1);

        let started = std::time::Instant::now();
        match execute(&self.services, &envelope.job).instrument(span).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %envelope.id,
                    job = envelope.job.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.queue.ack(conn, &reserved).await
            }
            Err(e) => {
                let attempts = envelope.attempts + 1;
                match next_step(attempts, self.config.max_attempts, self.config.retry_base_secs, Utc::now()) {
                    RetryDecision::RetryAt(at) => {
                        tracing::warn!(
                            job_id = %envelope.id,
                            job = envelope.job.name(),
                            attempts,
                            retry_at = %at,
                            error = %e,
                            "Job failed, will retry"
                        );
                        self.queue.retry_later(conn, &reserved, at).await
                    }
                    RetryDecision::GiveUp => {
                        tracing::error!(
                            job_id = %envelope.id,
                            job = envelope.job.name(),
                            attempts,
                            error = %e,
                            "Job failed permanently, moved to dead-letter list"
                        );
                        self.queue.dead_letter(conn, &reserved).await
                    }
                }
            }
        }
    }
}
