//! Redis-backed job store.
//!
//! Key layout (per queue):
//!
//! ```text
//! {prefix}:queues                 SET   known queue names
//! {prefix}:{queue}:id             STR   last assigned id (INCR)
//! {prefix}:{queue}:job:{member}   HASH  job record
//! {prefix}:{queue}:ready          ZSET  waiting + delayed jobs, score = ready time (ms)
//! {prefix}:{queue}:active         ZSET  leased jobs, score = lease start (ms)
//! {prefix}:{queue}:completed      ZSET  score = finish time (ms)
//! {prefix}:{queue}:failed         ZSET  score = finish time (ms)
//! ```
//!
//! Members are zero-padded ids so equal scores sort by id. Every transition runs
//! as one Lua script, which Redis executes atomically. Scripts touch job hashes
//! derived from their arguments, so the store targets a single Redis node.
//! Durability of an acknowledged enqueue follows the server's persistence
//! settings (AOF with `appendfsync always` for crash safety).

use super::JobStore;
use crate::backoff::{self, BackoffPolicy, RetryDecision};
use crate::clock::{Clock, SystemClock};
use crate::error::{QueueError, QueueResult};
use crate::job::{add_delay, FailureOutcome, Job, JobCounts, JobId, JobState, NewJob};
use crate::retention::{select_evictions, FinishedRecord, RetentionPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default key prefix for all queue keys.
pub const DEFAULT_KEY_PREFIX: &str = "jobs";

/// Attempts at a compare-and-set failure transition before giving up.
const MAX_FAIL_CAS_ATTEMPTS: usize = 3;

const ENQUEUE_SCRIPT: &str = r#"
local id = redis.call('INCR', KEYS[1])
local member = string.format('%020d', id)
local key = ARGV[1] .. member
redis.call('HSET', key, 'id', id, unpack(ARGV, 4))
redis.call('ZADD', KEYS[2], ARGV[3], member)
redis.call('SADD', KEYS[3], ARGV[2])
return id
"#;

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then return false end
local member = ids[1]
redis.call('ZREM', KEYS[1], member)
redis.call('ZADD', KEYS[2], ARGV[1], member)
local key = ARGV[2] .. member
redis.call('HSET', key, 'state', 'active', 'processed_at', ARGV[1])
return redis.call('HGETALL', key)
"#;

const COMPLETE_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return 'missing' end
if state ~= 'active' then return state end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
redis.call('HINCRBY', KEYS[1], 'attempts_made', 1)
redis.call('HSET', KEYS[1], 'state', 'completed', 'finished_at', ARGV[2])
if ARGV[3] ~= '' then redis.call('HSET', KEYS[1], 'result', ARGV[3]) end
return 'ok'
"#;

const FAIL_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return 'missing' end
if state ~= 'active' then return state end
if redis.call('HGET', KEYS[1], 'attempts_made') ~= ARGV[3] then return 'conflict' end
redis.call('HINCRBY', KEYS[1], 'attempts_made', 1)
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], 'last_error', ARGV[4])
if ARGV[5] == 'retry' then
  redis.call('ZADD', KEYS[3], ARGV[6], ARGV[1])
  redis.call('HSET', KEYS[1], 'state', 'delayed', 'ready_at', ARGV[6])
else
  redis.call('ZADD', KEYS[4], ARGV[2], ARGV[1])
  redis.call('HSET', KEYS[1], 'state', 'failed', 'finished_at', ARGV[2])
end
return 'ok'
"#;

const STALLED_SCRIPT: &str = r#"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, member in ipairs(members) do
  redis.call('ZREM', KEYS[1], member)
  redis.call('ZADD', KEYS[2], ARGV[2], member)
  redis.call('HSET', ARGV[3] .. member, 'state', 'waiting', 'ready_at', ARGV[2])
end
return #members
"#;

struct Scripts {
    enqueue: Script,
    claim: Script,
    complete: Script,
    fail: Script,
    stalled: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE_SCRIPT),
            claim: Script::new(CLAIM_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            stalled: Script::new(STALLED_SCRIPT),
        }
    }
}

/// Keys of a single queue.
struct QueueKeys {
    id: String,
    job_prefix: String,
    ready: String,
    active: String,
    completed: String,
    failed: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: &str) -> Self {
        let base = format!("{}:{}", prefix, queue);
        Self {
            id: format!("{}:id", base),
            job_prefix: format!("{}:job:", base),
            ready: format!("{}:ready", base),
            active: format!("{}:active", base),
            completed: format!("{}:completed", base),
            failed: format!("{}:failed", base),
        }
    }

    fn job(&self, id: JobId) -> String {
        format!("{}{}", self.job_prefix, member(id))
    }

    fn finished(&self, state: JobState) -> &str {
        match state {
            JobState::Failed => &self.failed,
            _ => &self.completed,
        }
    }
}

/// Sorted-set member for a job id.
fn member(id: JobId) -> String {
    format!("{:020}", id.0)
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(field: &str, raw: &str) -> QueueResult<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| QueueError::Serialization(format!("invalid timestamp in '{}': {}", field, raw)))
}

/// Decode a job hash.
fn job_from_hash(mut fields: HashMap<String, String>) -> QueueResult<Job> {
    fn take(fields: &mut HashMap<String, String>, key: &str) -> QueueResult<String> {
        fields
            .remove(key)
            .ok_or_else(|| QueueError::Serialization(format!("job hash is missing '{}'", key)))
    }
    fn optional_time(fields: &mut HashMap<String, String>, key: &str) -> QueueResult<Option<DateTime<Utc>>> {
        fields.remove(key).map(|raw| from_millis(key, &raw)).transpose()
    }
    fn number<T: std::str::FromStr>(raw: String, key: &str) -> QueueResult<T> {
        raw.parse()
            .map_err(|_| QueueError::Serialization(format!("invalid number in '{}': {}", key, raw)))
    }

    let id = JobId(number(take(&mut fields, "id")?, "id")?);
    let state: JobState = take(&mut fields, "state")?
        .parse()
        .map_err(|e| QueueError::Serialization(format!("invalid state: {}", e)))?;
    let created_at = from_millis("created_at", &take(&mut fields, "created_at")?)?;
    let ready_at = from_millis("ready_at", &take(&mut fields, "ready_at")?)?;

    Ok(Job {
        id,
        queue: take(&mut fields, "queue")?,
        payload: serde_json::from_str(&take(&mut fields, "payload")?)?,
        state,
        attempts_made: number(take(&mut fields, "attempts_made")?, "attempts_made")?,
        max_attempts: number(take(&mut fields, "max_attempts")?, "max_attempts")?,
        backoff: serde_json::from_str::<BackoffPolicy>(&take(&mut fields, "backoff")?)?,
        retention: serde_json::from_str::<RetentionPolicy>(&take(&mut fields, "retention")?)?,
        created_at,
        ready_at,
        processed_at: optional_time(&mut fields, "processed_at")?,
        finished_at: optional_time(&mut fields, "finished_at")?,
        last_error: fields.remove("last_error"),
        result: fields
            .remove("result")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
    })
}

/// Map a non-`ok` script reply to an error.
fn transition_error(queue: &str, id: JobId, reply: &str) -> QueueError {
    match reply {
        "missing" => QueueError::NotFound {
            queue: queue.to_string(),
            id,
        },
        other => match other.parse::<JobState>() {
            Ok(actual) => QueueError::InvalidTransition {
                id,
                expected: JobState::Active,
                actual,
            },
            Err(_) => QueueError::StoreUnavailable(format!("unexpected script reply: {}", other)),
        },
    }
}

/// Job store persisted in Redis.
#[derive(Clone)]
pub struct RedisJobStore {
    redis: ConnectionManager,
    prefix: String,
    clock: Arc<dyn Clock>,
    scripts: Arc<Scripts>,
}

impl RedisJobStore {
    /// Create a store on an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            clock: Arc::new(SystemClock),
            scripts: Arc::new(Scripts::load()),
        }
    }

    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!(prefix = DEFAULT_KEY_PREFIX, "Connected Redis job store");
        Ok(Self::new(manager))
    }

    /// Set the key prefix (useful to isolate environments or tests).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.prefix, queue)
    }

    fn queues_key(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    async fn read_job(&self, keys: &QueueKeys, id: JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(keys.job(id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_hash(fields).map(Some)
    }

    /// Evict finished records of one set outside their retention bounds.
    async fn apply_retention(&self, queue: &str, state: JobState) -> QueueResult<u64> {
        let keys = self.keys(queue);
        let set = keys.finished(state);
        let mut conn = self.redis.clone();

        let entries: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(set)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        for (member, _) in &entries {
            pipe.cmd("HGET")
                .arg(format!("{}{}", keys.job_prefix, member))
                .arg("retention");
        }
        let policies: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let records: Vec<FinishedRecord> = entries
            .iter()
            .zip(policies)
            .filter_map(|((member, score), policy)| {
                let id = member.parse::<JobId>().ok()?;
                let finished_at = DateTime::from_timestamp_millis(*score as i64)?;
                let policy = policy
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default();
                Some(FinishedRecord {
                    id,
                    finished_at,
                    policy,
                })
            })
            .collect();

        let evicted = select_evictions(&records, self.clock.now());
        if evicted.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &evicted {
            pipe.cmd("ZREM").arg(set).arg(member(*id)).ignore();
            pipe.cmd("DEL").arg(keys.job(*id)).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!(queue = %queue, state = %state, evicted = evicted.len(), "Evicted finished jobs");
        Ok(evicted.len() as u64)
    }

    async fn apply_retention_best_effort(&self, queue: &str, state: JobState) {
        if let Err(e) = self.apply_retention(queue, state).await {
            warn!(queue = %queue, state = %state, error = %e, "Retention cleanup failed");
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, new_job: NewJob) -> QueueResult<JobId> {
        let now = self.clock.now();
        let keys = self.keys(&new_job.queue);
        let queue = new_job.queue.clone();
        // The id is assigned inside the script; the placeholder is not stored.
        let job = new_job.into_job(JobId(0), now);

        let fields: Vec<(&str, String)> = vec![
            ("queue", job.queue.clone()),
            ("payload", serde_json::to_string(&job.payload)?),
            ("state", job.state.to_string()),
            ("attempts_made", job.attempts_made.to_string()),
            ("max_attempts", job.max_attempts.to_string()),
            ("backoff", serde_json::to_string(&job.backoff)?),
            ("retention", serde_json::to_string(&job.retention)?),
            ("created_at", millis(job.created_at).to_string()),
            ("ready_at", millis(job.ready_at).to_string()),
        ];

        let mut invocation = self.scripts.enqueue.key(&keys.id);
        invocation
            .key(&keys.ready)
            .key(self.queues_key())
            .arg(&keys.job_prefix)
            .arg(&queue)
            .arg(millis(job.ready_at));
        for (field, value) in &fields {
            invocation.arg(*field).arg(value);
        }

        let mut conn = self.redis.clone();
        let id: u64 = invocation.invoke_async(&mut conn).await?;

        debug!(queue = %queue, job_id = id, state = %job.state, "Stored job");
        Ok(JobId(id))
    }

    async fn claim_next(&self, queue: &str) -> QueueResult<Option<Job>> {
        let keys = self.keys(queue);
        let now = millis(self.clock.now());
        let mut conn = self.redis.clone();

        let fields: Option<HashMap<String, String>> = self
            .scripts
            .claim
            .key(&keys.ready)
            .key(&keys.active)
            .arg(now)
            .arg(&keys.job_prefix)
            .invoke_async(&mut conn)
            .await?;

        fields.map(job_from_hash).transpose()
    }

    async fn mark_completed(
        &self,
        queue: &str,
        id: JobId,
        result: Option<serde_json::Value>,
    ) -> QueueResult<()> {
        let keys = self.keys(queue);
        let now = millis(self.clock.now());
        let result = match result {
            Some(value) => serde_json::to_string(&value)?,
            None => String::new(),
        };
        let mut conn = self.redis.clone();

        let reply: String = self
            .scripts
            .complete
            .key(keys.job(id))
            .key(&keys.active)
            .key(&keys.completed)
            .arg(member(id))
            .arg(now)
            .arg(result)
            .invoke_async(&mut conn)
            .await?;

        if reply != "ok" {
            return Err(transition_error(queue, id, &reply));
        }

        self.apply_retention_best_effort(queue, JobState::Completed).await;
        Ok(())
    }

    async fn mark_failed(&self, queue: &str, id: JobId, error: &str) -> QueueResult<FailureOutcome> {
        let keys = self.keys(queue);

        for _ in 0..MAX_FAIL_CAS_ATTEMPTS {
            let job = self
                .read_job(&keys, id)
                .await?
                .ok_or_else(|| QueueError::NotFound {
                    queue: queue.to_string(),
                    id,
                })?;
            if job.state != JobState::Active {
                return Err(QueueError::InvalidTransition {
                    id,
                    expected: JobState::Active,
                    actual: job.state,
                });
            }

            let now = self.clock.now();
            let attempts_made = job.attempts_made + 1;
            let (decision, outcome) = match backoff::decide(attempts_made, job.max_attempts, &job.backoff) {
                RetryDecision::Retry { delay_ms } => {
                    let ready_at = add_delay(now, Duration::from_millis(delay_ms));
                    (
                        "retry",
                        FailureOutcome::Retrying {
                            attempts_made,
                            delay_ms,
                            ready_at,
                        },
                    )
                }
                RetryDecision::Exhausted => ("fail", FailureOutcome::Failed { attempts_made }),
            };
            let ready_ms = match outcome {
                FailureOutcome::Retrying { ready_at, .. } => millis(ready_at),
                FailureOutcome::Failed { .. } => millis(now),
            };

            let mut conn = self.redis.clone();
            let reply: String = self
                .scripts
                .fail
                .key(keys.job(id))
                .key(&keys.active)
                .key(&keys.ready)
                .key(&keys.failed)
                .arg(member(id))
                .arg(millis(now))
                .arg(job.attempts_made)
                .arg(error)
                .arg(decision)
                .arg(ready_ms)
                .invoke_async(&mut conn)
                .await?;

            match reply.as_str() {
                "ok" => {
                    if !outcome.will_retry() {
                        self.apply_retention_best_effort(queue, JobState::Failed).await;
                    }
                    return Ok(outcome);
                }
                "conflict" => {
                    debug!(queue = %queue, job_id = %id, "Attempt counter moved, re-reading job");
                    continue;
                }
                other => return Err(transition_error(queue, id, other)),
            }
        }

        Err(QueueError::StoreUnavailable(format!(
            "job {} kept changing while recording a failure",
            id
        )))
    }

    async fn sweep_retention(&self) -> QueueResult<u64> {
        let mut conn = self.redis.clone();
        let queues: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.queues_key())
            .query_async(&mut conn)
            .await?;

        let mut evicted = 0;
        for queue in queues {
            evicted += self.apply_retention(&queue, JobState::Completed).await?;
            evicted += self.apply_retention(&queue, JobState::Failed).await?;
        }
        Ok(evicted)
    }

    async fn get(&self, queue: &str, id: JobId) -> QueueResult<Option<Job>> {
        self.read_job(&self.keys(queue), id).await
    }

    /// Ready jobs whose time has come count as waiting, the rest as delayed.
    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        let keys = self.keys(queue);
        let now = millis(self.clock.now());
        let mut conn = self.redis.clone();

        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .cmd("ZCOUNT")
            .arg(&keys.ready)
            .arg("-inf")
            .arg(now)
            .cmd("ZCOUNT")
            .arg(&keys.ready)
            .arg(format!("({}", now))
            .arg("+inf")
            .cmd("ZCARD")
            .arg(&keys.active)
            .cmd("ZCARD")
            .arg(&keys.completed)
            .cmd("ZCARD")
            .arg(&keys.failed)
            .query_async(&mut conn)
            .await?;

        Ok(JobCounts {
            waiting,
            active,
            delayed,
            completed,
            failed,
        })
    }

    async fn requeue_stalled(&self, queue: &str, lease_timeout: Duration) -> QueueResult<u64> {
        let keys = self.keys(queue);
        let now = self.clock.now();
        let cutoff = millis(now).saturating_sub(lease_timeout.as_millis().min(i64::MAX as u128) as i64);
        let mut conn = self.redis.clone();

        let requeued: u64 = self
            .scripts
            .stalled
            .key(&keys.active)
            .key(&keys.ready)
            .arg(cutoff)
            .arg(millis(now))
            .arg(&keys.job_prefix)
            .invoke_async(&mut conn)
            .await?;

        if requeued > 0 {
            warn!(queue = %queue, requeued, "Requeued stalled jobs");
        }
        Ok(requeued)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.redis.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(QueueError::StoreUnavailable(format!("unexpected PING reply: {}", reply)))
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
