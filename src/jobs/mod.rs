//! Background jobs
//!
//! The scheduler enqueues jobs on a Redis list; a pool of workers consumes
//! them with at-least-once delivery. Every job is idempotent, so a job run
//! twice after a crash or a retry leaves the same state as a single run.

pub mod queue;
pub mod scheduler;
pub mod worker;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backoff never waits longer than this
const MAX_RETRY_DELAY_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Fine overdue borrowings and send the daily report
    CheckOverdueBorrowings,
    /// Expire payments whose provider session has expired
    TrackExpiredSessions,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::CheckOverdueBorrowings => "check_overdue_borrowings",
            Job::TrackExpiredSessions => "track_expired_sessions",
        }
    }
}

/// A job as stored in Redis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job: Job,
    /// Failed executions so far
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// What to do with a job that just failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    GiveUp,
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at one hour
pub fn retry_delay(base_secs: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let secs = base_secs
        .saturating_mul(1u64 << exponent)
        .min(MAX_RETRY_DELAY_SECS);
    Duration::seconds(secs as i64)
}

/// Decide between another attempt and the dead-letter list.
///
/// `attempts` counts the failure being handled. Up to 10% jitter spreads
/// retries of jobs that failed together.
pub fn next_step(attempts: u32, max_attempts: u32, base_secs: u64, now: DateTime<Utc>) -> RetryDecision {
    if attempts >= max_attempts {
        return RetryDecision::GiveUp;
    }
    let delay = retry_delay(base_secs, attempts);
    let jitter_ms = rand::thread_rng().gen_range(0..=delay.num_milliseconds() / 10);
    RetryDecision::RetryAt(now + delay + Duration::milliseconds(jitter_ms))
}
