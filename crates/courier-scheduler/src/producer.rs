//! Producer side: create task rows and enqueue the jobs that fire them.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use courier_core::error::{CourierError, Result};
use courier_core::types::{COMPLETED_MARKER, JobId, NewScheduledTask, TaskId};

use crate::compose::parse_content;
use crate::cron;
use crate::handlers::{IMMEDIATE_TASK, SCHEDULED_TASK, scheduled_job_key};
use crate::lanes::Lane;
use crate::persistence::SqliteStore;
use crate::queue::JobQueue;

pub struct TaskProducer {
    store: Arc<SqliteStore>,
    queue: Arc<JobQueue>,
}

impl TaskProducer {
    pub fn new(store: Arc<SqliteStore>, queue: Arc<JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Insert a pending email task and enqueue it on the `immediate` lane.
    pub fn create_immediate_task(
        &self,
        template_id: Option<i64>,
        content: &str,
    ) -> Result<(TaskId, JobId)> {
        parse_content(content)?;
        let task_id = self.store.insert_immediate_task(template_id, content)?;
        let job_id = self
            .queue
            .enqueue(IMMEDIATE_TASK, &task_id.to_string(), Lane::Immediate)?;
        tracing::info!("📨 Immediate task {task_id} queued as job #{job_id}");
        Ok((task_id, job_id))
    }

    pub fn create_scheduled_task(&self, task: &NewScheduledTask) -> Result<TaskId> {
        self.create_scheduled_task_at(task, Utc::now())
    }

    /// Insert a scheduled task and enqueue its first firing.
    pub fn create_scheduled_task_at(
        &self,
        task: &NewScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<TaskId> {
        if task.template_id.is_some() {
            parse_content(&task.content)?;
        }
        if let Some(url) = task.url.as_deref() {
            validate_webhook_url(url)?;
        }
        let next = cron::next_run(&task.cron, now)?;

        let task_id = self.store.insert_scheduled_task(task, next)?;
        self.queue.enqueue_at(
            SCHEDULED_TASK,
            &task_id.to_string(),
            Lane::Default,
            next,
            Some(&scheduled_job_key(task_id, next)),
        )?;
        tracing::info!("🗓️ Scheduled task {task_id} ({}) first run at {next}", task.cron);
        Ok(task_id)
    }

    /// Delete the row; a job already queued for it becomes a no-op.
    pub fn delete_scheduled_task(&self, task_id: TaskId) -> Result<bool> {
        let deleted = self.store.delete_scheduled_task(task_id)?;
        if deleted {
            tracing::info!("🗑️ Scheduled task {task_id} deleted");
        }
        Ok(deleted)
    }

    /// Strip the completed marker so the next firing calls the webhook
    /// again. Returns `false` when there was no marker to strip.
    pub fn reactivate_webhook(&self, task_id: TaskId) -> Result<bool> {
        let task = self
            .store
            .get_scheduled_task(task_id)?
            .ok_or_else(|| CourierError::NotFound(format!("scheduled task {task_id}")))?;

        let Some(original) = task
            .url
            .as_deref()
            .and_then(|url| url.strip_prefix(COMPLETED_MARKER))
        else {
            return Ok(false);
        };
        self.store.set_scheduled_url(task_id, original)?;
        tracing::info!("🔄 Scheduled task {task_id} webhook reactivated");
        Ok(true)
    }
}

fn validate_webhook_url(url: &str) -> Result<()> {
    if url.starts_with(COMPLETED_MARKER) {
        return Err(CourierError::Validation(format!(
            "webhook url must not start with '{COMPLETED_MARKER}'"
        )));
    }
    let absolute = ["http://", "https://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme));
    if !absolute {
        return Err(CourierError::Validation(format!(
            "webhook url must be absolute http(s): '{url}'"
        )));
    }
    Ok(())
}
