//! `scheduled:task`: one firing of a cron task: an optional one-shot webhook,
//! an optional email, exactly one execution log row, then the schedule moves
//! to the next slot whatever the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use courier_core::error::{CourierError, Result};
use courier_core::traits::{Mailer, ScheduledTaskRepository, TemplateRepository, WebhookClient};
use courier_core::types::{
    COMPLETED_MARKER, ExecutionStatus, JobId, NewScheduledTaskLog, ScheduledTask, TaskId,
};

use super::{SCHEDULED_TASK, TEMPLATE_ID_REQUIRED, decode_task_id, scheduled_job_key};
use crate::compose::{compose, parse_content};
use crate::cron;
use crate::lanes::Lane;
use crate::log_sink::LogSink;
use crate::queue::{Job, JobQueue};
use crate::worker::JobHandler;

/// `http_status` logged when no HTTP response was received.
pub const NO_RESPONSE_STATUS: u16 = 0;

/// Log error of a firing cut off by the handler deadline.
pub const DEADLINE_EXCEEDED: &str = "handler deadline exceeded";

/// Request target for a task's webhook: `<url>/<user id>` when a user is set.
pub fn webhook_target(url: &str, user_id: Option<i64>) -> String {
    match user_id {
        Some(uid) => format!("{url}/{uid}"),
        None => url.to_string(),
    }
}

/// A failed phase, carrying what goes onto the log row.
struct PhaseFailure {
    http_status: u16,
    detail: String,
    error: CourierError,
}

impl PhaseFailure {
    fn new(http_status: u16, error: CourierError) -> Self {
        Self {
            http_status,
            detail: error.to_string(),
            error,
        }
    }
}

pub struct ScheduledTaskHandler {
    tasks: Arc<dyn ScheduledTaskRepository>,
    templates: Arc<dyn TemplateRepository>,
    mailer: Arc<dyn Mailer>,
    webhook: Arc<dyn WebhookClient>,
    logs: LogSink,
    queue: Option<Arc<JobQueue>>,
}

impl ScheduledTaskHandler {
    pub fn new(
        tasks: Arc<dyn ScheduledTaskRepository>,
        templates: Arc<dyn TemplateRepository>,
        mailer: Arc<dyn Mailer>,
        webhook: Arc<dyn WebhookClient>,
        logs: LogSink,
    ) -> Self {
        Self {
            tasks,
            templates,
            mailer,
            webhook,
            logs,
            queue: None,
        }
    }

    /// Enqueue the job for the next firing on every reschedule.
    pub fn with_queue(mut self, queue: Arc<JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn process(&self, task_id: TaskId, job_id: JobId) -> Result<()> {
        self.process_at(task_id, job_id, Utc::now()).await
    }

    /// Fire `task_id` as of `now`.
    ///
    /// Errors before the task is loaded are plain and may be retried. Once the
    /// firing has started every error comes back as
    /// [`CourierError::Settled`]; the phase error wins over a reschedule error
    /// when both occur.
    pub async fn process_at(
        &self,
        task_id: TaskId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            tracing::debug!("Scheduled task {task_id} no longer exists; skipping");
            return Ok(());
        };

        let mut guard = RescheduleGuard::new(
            self.tasks.clone(),
            self.queue.clone(),
            self.logs.clone(),
            &task,
            job_id,
            now,
        );
        let outcome = self.run_phases(&task).await;

        let entry = match &outcome {
            Ok(()) => NewScheduledTaskLog {
                task_id,
                job_id,
                status: ExecutionStatus::Completed,
                http_status: 200,
                error: String::new(),
            },
            Err(failure) => NewScheduledTaskLog {
                task_id,
                job_id,
                status: ExecutionStatus::Failed,
                http_status: failure.http_status,
                error: failure.detail.clone(),
            },
        };
        guard.record(entry).await;

        let rescheduled = guard.finish().await;
        let error = match outcome {
            Ok(()) => {
                tracing::info!("✅ Scheduled task {task_id} fired");
                match rescheduled {
                    Ok(_) => return Ok(()),
                    Err(e) => e,
                }
            }
            Err(failure) => {
                tracing::warn!("❌ Scheduled task {task_id} failed: {}", failure.detail);
                if let Err(e) = rescheduled {
                    tracing::error!("Scheduled task {task_id} not rescheduled: {e}");
                }
                failure.error
            }
        };
        Err(CourierError::Settled(Box::new(error)))
    }

    async fn run_phases(&self, task: &ScheduledTask) -> std::result::Result<(), PhaseFailure> {
        let mut webhook_status = None;

        if let Some(url) = task.pending_webhook() {
            let target = webhook_target(url, task.user_id);
            tracing::info!("🌐 Scheduled task {} webhook GET {target}", task.id);
            let response = self
                .webhook
                .get(&target)
                .await
                .map_err(|e| PhaseFailure::new(NO_RESPONSE_STATUS, e))?;

            if !response.is_success() {
                return Err(PhaseFailure {
                    http_status: response.status,
                    error: CourierError::Downstream(format!(
                        "webhook returned HTTP {}",
                        response.status
                    )),
                    detail: response.body,
                });
            }
            if response.status == 200 {
                self.tasks
                    .update_url(task.id, &format!("{COMPLETED_MARKER}{url}"))
                    .await
                    .map_err(|e| PhaseFailure::new(200, e))?;
            }
            webhook_status = Some(response.status);
        } else if task.webhook_completed() {
            tracing::debug!("Scheduled task {} webhook already completed", task.id);
        }

        if task.template_id.is_some() {
            self.send_email(task)
                .await
                .map_err(|e| PhaseFailure::new(webhook_status.unwrap_or(NO_RESPONSE_STATUS), e))?;
        }
        Ok(())
    }

    async fn send_email(&self, task: &ScheduledTask) -> Result<()> {
        let template_id = task
            .template_id
            .ok_or_else(|| CourierError::Validation(TEMPLATE_ID_REQUIRED.into()))?;
        let template = self.templates.get_template_by_id(template_id).await?;
        let content = parse_content(&task.content)?;
        let email = compose(&template, &content.vars);
        self.mailer
            .send(&content.recipient, &email.subject, &email.body)
            .await?;
        tracing::info!("✉️ Scheduled task {} sent to {}", task.id, content.recipient);
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ScheduledTaskHandler {
    fn job_type(&self) -> &str {
        SCHEDULED_TASK
    }

    async fn handle(&self, job: &Job) -> Result<()> {
        let task_id = decode_task_id(&job.payload)?;
        self.process(task_id, job.id).await
    }

    /// The guard has already queued the next slot when the deadline hits.
    fn retries_after_deadline(&self) -> bool {
        false
    }
}

/// Moves a fired task to its next slot, and leaves exactly one log row, on
/// every exit path.
///
/// [`finish`](Self::finish) reschedules inline. If the handler future is
/// dropped first (deadline exceeded), `Drop` writes a failed row unless
/// [`record`](Self::record) already wrote one, then reschedules. That work
/// runs as a pending write of the [`LogSink`].
pub struct RescheduleGuard {
    tasks: Arc<dyn ScheduledTaskRepository>,
    queue: Option<Arc<JobQueue>>,
    logs: LogSink,
    task_id: TaskId,
    job_id: JobId,
    cron: String,
    fired_at: DateTime<Utc>,
    logged: bool,
    armed: bool,
}

impl RescheduleGuard {
    pub fn new(
        tasks: Arc<dyn ScheduledTaskRepository>,
        queue: Option<Arc<JobQueue>>,
        logs: LogSink,
        task: &ScheduledTask,
        job_id: JobId,
        fired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tasks,
            queue,
            logs,
            task_id: task.id,
            job_id,
            cron: task.cron.clone(),
            fired_at,
            logged: false,
            armed: true,
        }
    }

    /// Write the firing's log row.
    pub async fn record(&mut self, entry: NewScheduledTaskLog) {
        self.logs.record(entry).await;
        self.logged = true;
    }

    /// Persist the new run times (and enqueue the next firing). Returns the
    /// next run.
    pub async fn finish(mut self) -> Result<DateTime<Utc>> {
        self.armed = false;
        reschedule(
            self.tasks.as_ref(),
            self.queue.as_deref(),
            self.task_id,
            &self.cron,
            self.fired_at,
        )
        .await
    }
}

impl Drop for RescheduleGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let tasks = self.tasks.clone();
        let queue = self.queue.clone();
        let logs = self.logs.clone();
        let cron = std::mem::take(&mut self.cron);
        let (task_id, fired_at) = (self.task_id, self.fired_at);
        let entry = (!self.logged).then(|| NewScheduledTaskLog {
            task_id,
            job_id: self.job_id,
            status: ExecutionStatus::Failed,
            http_status: NO_RESPONSE_STATUS,
            error: DEADLINE_EXCEEDED.into(),
        });

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Scheduled task {task_id} dropped outside a runtime; not rescheduled");
            return;
        };
        tracing::warn!("⏭️ Scheduled task {task_id} interrupted; rescheduling in background");
        self.logs.spawn_on(
            async move {
                if let Some(entry) = entry {
                    logs.record(entry).await;
                }
                let queue = queue.as_deref();
                if let Err(e) = reschedule(tasks.as_ref(), queue, task_id, &cron, fired_at).await {
                    tracing::error!("Scheduled task {task_id} not rescheduled: {e}");
                }
            },
            &handle,
        );
    }
}

async fn reschedule(
    tasks: &dyn ScheduledTaskRepository,
    queue: Option<&JobQueue>,
    task_id: TaskId,
    cron_expr: &str,
    fired_at: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let next = cron::next_run(cron_expr, fired_at)?;
    tasks
        .update_previous_and_next_run(task_id, fired_at, next)
        .await?;
    if let Some(queue) = queue {
        queue.enqueue_at(
            SCHEDULED_TASK,
            &task_id.to_string(),
            Lane::Default,
            next,
            Some(&scheduled_job_key(task_id, next)),
        )?;
    }
    tracing::info!("⏰ Scheduled task {task_id} next run at {next}");
    Ok(next)
}
