//! Retention policy for finished jobs.
//!
//! Completed and failed records are ranked separately, newest first. A record is
//! evicted once its rank reaches its policy's `max_count` or once it is older than
//! `max_age_secs`, whichever happens first.

use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keep at most this many finished jobs per queue by default.
pub const DEFAULT_MAX_COUNT: u64 = 100;

/// Keep finished jobs for one day by default.
pub const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60 * 24;

/// Bounds on how long finished job records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_count: u64,
    pub max_age_secs: u64,
}

impl RetentionPolicy {
    pub fn new(max_count: u64, max_age_secs: u64) -> Self {
        Self {
            max_count,
            max_age_secs,
        }
    }

    /// Whether a record of this age and rank (0 = newest) must go.
    pub fn should_evict(&self, rank: u64, finished_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if rank >= self.max_count {
            return true;
        }
        let age = now.signed_duration_since(finished_at).num_seconds();
        age > 0 && age as u64 > self.max_age_secs
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }
}

/// A finished job as seen by the retention sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRecord {
    pub id: JobId,
    pub finished_at: DateTime<Utc>,
    pub policy: RetentionPolicy,
}

/// Select the records to evict from one finished set (completed or failed).
pub fn select_evictions(records: &[FinishedRecord], now: DateTime<Utc>) -> Vec<JobId> {
    let mut ranked: Vec<&FinishedRecord> = records.iter().collect();
    ranked.sort_by(|a, b| {
        b.finished_at
            .cmp(&a.finished_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    ranked
        .into_iter()
        .enumerate()
        .filter(|(rank, record)| record.policy.should_evict(*rank as u64, record.finished_at, now))
        .map(|(_, record)| record.id)
        .collect()
}
