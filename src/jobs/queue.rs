//! Redis-backed job queue with at-least-once delivery
//!
//! Keys under `{prefix}`:
//! - `:ready` list of jobs waiting for a worker (LPUSH in, BRPOPLPUSH out)
//! - `:processing` list of jobs taken by a worker and not yet acknowledged
//! - `:delayed` sorted set of jobs waiting for a retry, scored by due time
//! - `:dead` list of jobs that exhausted their attempts

use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;

use super::{Job, JobEnvelope};
use crate::{
    error::{AppError, AppResult},
    services::redis::RedisService,
};

/// Jobs promoted from the delayed set per call
const PROMOTE_BATCH: isize = 100;

fn redis_error(action: &str) -> impl Fn(redis::RedisError) -> AppError + '_ {
    move |e| AppError::Internal(format!("Failed to {}: {}", action, e))
}

/// A job taken off the ready list. `raw` is the exact stored payload, needed to
/// remove it from the processing list.
#[derive(Debug, Clone)]
pub struct Reserved {
    pub raw: String,
    pub envelope: JobEnvelope,
}

#[derive(Clone)]
pub struct JobQueue {
    redis: RedisService,
    ready_key: String,
    processing_key: String,
    delayed_key: String,
    dead_key: String,
}

impl JobQueue {
    pub fn new(redis: RedisService, prefix: &str) -> Self {
        Self {
            redis,
            ready_key: format!("{}:ready", prefix),
            processing_key: format!("{}:processing", prefix),
            delayed_key: format!("{}:delayed", prefix),
            dead_key: format!("{}:dead", prefix),
        }
    }

    pub fn redis(&self) -> &RedisService {
        &self.redis
    }

    pub async fn enqueue(&self, job: Job) -> AppResult<JobEnvelope> {
        let envelope = JobEnvelope::new(job);
        let raw = encode(&envelope)?;
        let mut conn = self.redis.get_connection().await?;
        redis::cmd("LPUSH")
            .arg(&self.ready_key)
            .arg(&raw)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(redis_error("enqueue job"))?;

        tracing::debug!(job_id = %envelope.id, job = envelope.job.name(), "Job enqueued");
        Ok(envelope)
    }

    /// Wait up to `timeout_secs` for a job and move it to the processing list.
    ///
    /// Payloads that cannot be decoded go straight to the dead-letter list.
    pub async fn reserve(&self, conn: &mut MultiplexedConnection, timeout_secs: u64) -> AppResult<Option<Reserved>> {
        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.ready_key)
            .arg(&self.processing_key)
            .arg(timeout_secs)
            .query_async(conn)
            .await
            .map_err(redis_error("reserve job"))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<JobEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(Reserved { raw, envelope })),
            Err(e) => {
                tracing::error!(error = %e, payload = %raw, "Undecodable job moved to dead-letter list");
                self.move_to_dead(conn, &raw, &raw).await?;
                Ok(None)
            }
        }
    }

    /// Acknowledge a finished job
    pub async fn ack(&self, conn: &mut MultiplexedConnection, reserved: &Reserved) -> AppResult<()> {
        redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&reserved.raw)
            .query_async::<_, i64>(conn)
            .await
            .map_err(redis_error("acknowledge job"))?;
        Ok(())
    }

    /// Park a failed job in the delayed set until `retry_at`
    pub async fn retry_later(
        &self,
        conn: &mut MultiplexedConnection,
        reserved: &Reserved,
        retry_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut envelope = reserved.envelope.clone();
        envelope.attempts += 1;
        let raw = encode(&envelope)?;

        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&self.delayed_key)
            .arg(retry_at.timestamp_millis())
            .arg(&raw)
            .ignore()
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&reserved.raw)
            .ignore()
            .query_async::<_, ()>(conn)
            .await
            .map_err(redis_error("schedule job retry"))?;
        Ok(())
    }

    /// Give up on a job
    pub async fn dead_letter(&self, conn: &mut MultiplexedConnection, reserved: &Reserved) -> AppResult<()> {
        let mut envelope = reserved.envelope.clone();
        envelope.attempts += 1;
        let raw = encode(&envelope)?;
        self.move_to_dead(conn, &reserved.raw, &raw).await
    }

    async fn move_to_dead(&self, conn: &mut MultiplexedConnection, processing_raw: &str, dead_raw: &str) -> AppResult<()> {
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&self.dead_key)
            .arg(dead_raw)
            .ignore()
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(processing_raw)
            .ignore()
            .query_async::<_, ()>(conn)
            .await
            .map_err(redis_error("dead-letter job"))?;
        Ok(())
    }

    /// Move delayed jobs that are due back to the ready list.
    ///
    /// A job is pushed only by the caller whose ZREM removed it, so concurrent
    /// promoters never duplicate a job.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut conn = self.redis.get_connection().await?;
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.delayed_key)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(&mut conn)
            .await
            .map_err(redis_error("read delayed jobs"))?;

        let mut promoted = 0;
        for raw in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.delayed_key)
                .arg(&raw)
                .query_async(&mut conn)
                .await
                .map_err(redis_error("promote job"))?;
            if removed == 1 {
                redis::cmd("LPUSH")
                    .arg(&self.ready_key)
                    .arg(&raw)
                    .query_async::<_, i64>(&mut conn)
                    .await
                    .map_err(redis_error("promote job"))?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Put back jobs left in the processing list by a worker that died.
    ///
    /// Must run before workers start: anything in the list at that point has
    /// no live owner.
    pub async fn recover_orphans(&self) -> AppResult<usize> {
        let mut conn = self.redis.get_connection().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(&self.processing_key)
                .arg(&self.ready_key)
                .query_async(&mut conn)
                .await
                .map_err(redis_error("recover orphaned jobs"))?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Number of jobs in the dead-letter list
    pub async fn dead_count(&self) -> AppResult<i64> {
        let mut conn = self.redis.get_connection().await?;
        redis::cmd("LLEN")
            .arg(&self.dead_key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error("count dead jobs"))
    }
}

fn encode(envelope: &JobEnvelope) -> AppResult<String> {
    serde_json::to_string(envelope)
        .map_err(|e| AppError::Internal(format!("Failed to encode job: {}", e)))
}
