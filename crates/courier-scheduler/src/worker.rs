//! Worker: pulls jobs from every lane and routes them to handlers by type.
//! One poller per lane; a semaphore caps in-flight handlers per lane, and
//! each invocation runs under the configured handler deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::Instrument;

use courier_core::config::{QueueConfig, WorkerConfig};
use courier_core::error::{CourierError, Result};

use crate::lanes::Lane;
use crate::queue::{Job, JobQueue, JobState};

/// Executes one job type. Must tolerate duplicate delivery of the same job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job type this handler serves, e.g. `"immediate:task"`.
    fn job_type(&self) -> &str;

    async fn handle(&self, job: &Job) -> Result<()>;

    /// Whether a job cut off by the handler deadline goes back to the queue.
    /// Handlers whose cancellation path enqueues the follow-up turn this off.
    fn retries_after_deadline(&self) -> bool {
        true
    }
}

/// Job type → handler routing table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        if self.handlers.insert(job_type.clone(), handler).is_some() {
            tracing::warn!("⚠️ Handler for '{job_type}' replaced");
        }
    }

    pub fn find(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// What happened to a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Failed; the queue will deliver it again after backoff.
    Retrying,
    /// Failed for good (not retryable, retries spent, or no handler).
    Archived,
}

/// The worker process: lane pollers sharing one queue and routing table.
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    queue: Arc<JobQueue>,
    registry: HandlerRegistry,
    queue_config: QueueConfig,
    handler_timeout: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: HandlerRegistry,
        queue_config: QueueConfig,
        worker_config: &WorkerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                queue,
                registry,
                queue_config,
                handler_timeout: Duration::from_secs(worker_config.handler_timeout_secs),
            }),
        }
    }

    /// Run every lane until `shutdown` flips to `true` (or its sender is
    /// dropped), then wait for in-flight handlers to finish.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            "👷 Worker started: handlers [{}], handler deadline {:?}",
            self.inner.registry.job_types().join(", "),
            self.inner.handler_timeout
        );

        let mut lanes = JoinSet::new();
        for lane in Lane::ALL {
            lanes.spawn(self.inner.clone().poll_lane(lane, shutdown.clone()));
        }
        while let Some(res) = lanes.join_next().await {
            res.map_err(|e| CourierError::Queue(format!("lane poller crashed: {e}")))?;
        }

        tracing::info!("👋 Worker stopped");
        Ok(())
    }

    /// Claim and run at most one due job from `lane`, inline.
    pub async fn run_once(&self, lane: Lane) -> Result<Option<JobOutcome>> {
        let Some(job) = self.inner.queue.dequeue(lane, Utc::now())? else {
            return Ok(None);
        };
        self.inner.run_job(job).await.map(Some)
    }
}

impl WorkerInner {
    async fn poll_lane(self: Arc<Self>, lane: Lane, mut shutdown: watch::Receiver<bool>) {
        let limit = lane.max_concurrent(&self.queue_config);
        let permits = Arc::new(Semaphore::new(limit));
        let idle = Duration::from_millis(self.queue_config.poll_interval_ms.max(10));
        let mut in_flight = JoinSet::new();

        tracing::info!("🛤️ Lane[{lane}] polling (concurrency {limit})");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.queue.dequeue(lane, Utc::now()) {
                Ok(Some(job)) => {
                    let inner = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = inner.run_job(job).await {
                            tracing::error!("Queue update failed after job: {e}");
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if wait_or_shutdown(&mut shutdown, idle).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!("Lane[{lane}] dequeue failed: {e}");
                    if wait_or_shutdown(&mut shutdown, idle).await {
                        break;
                    }
                }
            }

            while let Some(res) = in_flight.try_join_next() {
                if let Err(e) = res {
                    tracing::error!("Lane[{lane}] handler task panicked: {e}");
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!("🛑 Lane[{lane}] draining {} in-flight job(s)", in_flight.len());
        }
        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                tracing::error!("Lane[{lane}] handler task panicked: {e}");
            }
        }
    }

    async fn run_job(&self, job: Job) -> Result<JobOutcome> {
        let span = tracing::info_span!(
            "job",
            id = job.id,
            job_type = %job.job_type,
            lane = %job.lane,
            attempt = job.attempts
        );
        self.dispatch(job).instrument(span).await
    }

    async fn dispatch(&self, job: Job) -> Result<JobOutcome> {
        let Some(handler) = self.registry.find(&job.job_type) else {
            tracing::warn!("❓ No handler registered for '{}'", job.job_type);
            let error = format!("no handler registered for '{}'", job.job_type);
            self.queue.fail(job.id, &error, false, Utc::now())?;
            return Ok(JobOutcome::Archived);
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.handler_timeout, handler.handle(&job)).await;
        let (error, retry) = match result {
            Ok(Ok(())) => {
                self.queue.complete(job.id)?;
                tracing::info!("✅ Job done in {:?}", started.elapsed());
                return Ok(JobOutcome::Completed);
            }
            Ok(Err(e)) => (e.to_string(), e.is_retryable()),
            Err(_) => (
                format!("handler deadline of {:?} exceeded", self.handler_timeout),
                handler.retries_after_deadline(),
            ),
        };

        let state = self.queue.fail(job.id, &error, retry, Utc::now())?;
        tracing::warn!("⚠️ Job failed ({}): {error}", state.as_str());
        Ok(match state {
            JobState::Archived => JobOutcome::Archived,
            _ => JobOutcome::Retrying,
        })
    }
}

/// Sleep for `period`; `true` when shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
