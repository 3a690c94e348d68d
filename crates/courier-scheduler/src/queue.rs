//! Durable at-least-once job queue on SQLite.
//!
//! A claimed job is leased, not removed: if the worker dies before it calls
//! [`JobQueue::complete`] or [`JobQueue::fail`], the lease expires and the job
//! is delivered again. Handlers must therefore tolerate running twice.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use courier_core::config::QueueConfig;
use courier_core::error::{CourierError, Result};
use courier_core::types::JobId;

use crate::lanes::{Lane, LaneStats};
use crate::persistence::{open_connection, parse_ts, text_enum, timestamp, ts};

/// Job lifecycle. `Archived` jobs exhausted their retries or were rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Archived,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Archived => "archived",
        }
    }
}

impl FromStr for JobState {
    type Err = CourierError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "archived" => Ok(JobState::Archived),
            other => Err(CourierError::Queue(format!("unknown job state '{other}'"))),
        }
    }
}

/// A queued unit of work. `payload` is the decimal task id.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub payload: String,
    pub lane: Lane,
    pub state: JobState,
    /// Deliveries so far, including the current one.
    pub attempts: u32,
    pub max_retry: u32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Exponential backoff between deliveries of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base_secs: config.retry_base_secs,
            max_secs: config.retry_max_secs,
        }
    }

    /// Delay before the next delivery after `attempt` failed deliveries.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let secs = self
            .base_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_secs);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
    }
}

const JOB_COLUMNS: &str =
    "id, job_type, payload, lane, state, attempts, max_retry, run_at, last_error";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        job_type: row.get(1)?,
        payload: row.get(2)?,
        lane: text_enum(row, 3)?,
        state: text_enum(row, 4)?,
        attempts: row.get(5)?,
        max_retry: row.get(6)?,
        run_at: timestamp(row, 7)?,
        last_error: row.get(8)?,
    })
}

fn queue_err(e: rusqlite::Error) -> CourierError {
    CourierError::Queue(e.to_string())
}

/// SQLite-backed queue with named lanes.
pub struct JobQueue {
    conn: Mutex<Connection>,
    lease: Duration,
    max_retry: u32,
    retry: RetryPolicy,
}

impl JobQueue {
    /// Open or create the queue tables in the given database file.
    pub fn open(path: &Path, config: &QueueConfig) -> Result<Self> {
        Self::from_connection(open_connection(path)?, config)
    }

    pub fn open_in_memory(config: &QueueConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(queue_err)?, config)
    }

    fn from_connection(conn: Connection, config: &QueueConfig) -> Result<Self> {
        let queue = Self {
            conn: Mutex::new(conn),
            lease: Duration::seconds(i64::try_from(config.lease_secs).unwrap_or(i64::MAX / 1000)),
            max_retry: config.max_retry,
            retry: RetryPolicy::from_config(config),
        };
        queue.migrate()?;
        Ok(queue)
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                lane TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',   -- pending, active, completed, archived
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retry INTEGER NOT NULL,
                run_at TEXT NOT NULL,
                lease_until TEXT,
                unique_key TEXT UNIQUE,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_lane_state_run ON jobs(lane, state, run_at);
         ",
            )
            .map_err(|e| CourierError::Queue(format!("Migration: {e}")))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CourierError::Queue(e.to_string()))
    }

    /// Enqueue a job for immediate delivery.
    pub fn enqueue(&self, job_type: &str, payload: &str, lane: Lane) -> Result<JobId> {
        self.enqueue_at(job_type, payload, lane, Utc::now(), None)?
            .ok_or_else(|| CourierError::Queue("enqueue ignored without a unique key".into()))
    }

    /// Enqueue a job that becomes visible at `run_at`. A `unique_key` that
    /// is already present makes this a no-op returning `None`.
    pub fn enqueue_at(
        &self,
        job_type: &str,
        payload: &str,
        lane: Lane,
        run_at: DateTime<Utc>,
        unique_key: Option<&str>,
    ) -> Result<Option<JobId>> {
        let conn = self.conn()?;
        let now = ts(Utc::now());
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO jobs
                 (job_type, payload, lane, state, attempts, max_retry, run_at, unique_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    job_type,
                    payload,
                    lane.as_str(),
                    self.max_retry,
                    ts(run_at),
                    unique_key,
                    now,
                ],
            )
            .map_err(queue_err)?;

        if inserted == 0 {
            tracing::debug!("📥 Lane[{lane}] duplicate {job_type} ignored ({unique_key:?})");
            return Ok(None);
        }
        let id = conn.last_insert_rowid();
        tracing::debug!("📥 Lane[{lane}] enqueue: {job_type} #{id} payload={payload} at {run_at}");
        Ok(Some(id))
    }

    /// Claim the next due job in `lane`: the oldest pending job whose
    /// `run_at` has passed, or an active job whose lease expired.
    pub fn dequeue(&self, lane: Lane, now: DateTime<Utc>) -> Result<Option<Job>> {
        let now_ts = ts(now);
        self.conn()?
            .query_row(
                &format!(
                    "UPDATE jobs
                     SET state = 'active', attempts = attempts + 1, lease_until = ?3, updated_at = ?2
                     WHERE id = (
                         SELECT id FROM jobs
                         WHERE lane = ?1
                           AND ((state = 'pending' AND run_at <= ?2)
                             OR (state = 'active' AND lease_until <= ?2))
                         ORDER BY run_at, id
                         LIMIT 1
                     )
                     RETURNING {JOB_COLUMNS}"
                ),
                rusqlite::params![lane.as_str(), now_ts, ts(now + self.lease)],
                job_from_row,
            )
            .optional()
            .map_err(queue_err)
    }

    /// Mark a job as done.
    pub fn complete(&self, id: JobId) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE jobs SET state = 'completed', lease_until = NULL, updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id, ts(Utc::now())],
            )
            .map_err(queue_err)?;
        Ok(())
    }

    /// Record a failed delivery. Retryable failures go back to pending with
    /// backoff until `max_retry` retries were spent; everything else is
    /// archived. Returns the resulting state.
    pub fn fail(
        &self,
        id: JobId,
        error: &str,
        retry: bool,
        now: DateTime<Utc>,
    ) -> Result<JobState> {
        let conn = self.conn()?;
        let (attempts, max_retry): (u32, u32) = conn
            .query_row(
                "SELECT attempts, max_retry FROM jobs WHERE id = ?1",
                [id],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()
            .map_err(queue_err)?
            .ok_or_else(|| CourierError::Queue(format!("job {id} not found")))?;

        if retry && attempts <= max_retry {
            let run_at = now + self.retry.backoff(attempts);
            conn.execute(
                "UPDATE jobs SET state = 'pending', run_at = ?2, lease_until = NULL, last_error = ?3, updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, ts(run_at), error, ts(now)],
            )
            .map_err(queue_err)?;
            tracing::debug!("🔁 Job #{id} retry {attempts}/{max_retry} at {run_at}");
            Ok(JobState::Pending)
        } else {
            conn.execute(
                "UPDATE jobs SET state = 'archived', lease_until = NULL, last_error = ?2, updated_at = ?3
                 WHERE id = ?1",
                rusqlite::params![id, error, ts(now)],
            )
            .map_err(queue_err)?;
            tracing::warn!("🗄️ Job #{id} archived after {attempts} attempt(s): {error}");
            Ok(JobState::Archived)
        }
    }

    pub fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.conn()?
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id],
                job_from_row,
            )
            .optional()
            .map_err(queue_err)
    }

    /// Earliest `run_at` among pending jobs in a lane.
    pub fn next_due(&self, lane: Lane) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT MIN(run_at) FROM jobs WHERE lane = ?1 AND state = 'pending'",
                [lane.as_str()],
                |row| row.get(0),
            )
            .map_err(queue_err)?;
        Ok(raw.as_deref().and_then(parse_ts))
    }

    /// Job counts per lane and state.
    pub fn stats(&self) -> Result<Vec<LaneStats>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT lane, state, COUNT(*) FROM jobs GROUP BY lane, state")
            .map_err(queue_err)?;
        let counts = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(queue_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(queue_err)?;

        let mut stats: Vec<LaneStats> = Lane::ALL
            .iter()
            .map(|lane| LaneStats {
                lane: lane.to_string(),
                ..LaneStats::default()
            })
            .collect();

        for (lane, state, count) in counts {
            let count = count.max(0) as u64;
            let Some(entry) = stats.iter_mut().find(|s| s.lane == lane) else {
                continue;
            };
            match state.parse::<JobState>() {
                Ok(JobState::Pending) => entry.pending += count,
                Ok(JobState::Active) => entry.active += count,
                Ok(JobState::Completed) => entry.completed += count,
                Ok(JobState::Archived) => entry.archived += count,
                Err(_) => {}
            }
        }
        Ok(stats)
    }
}
