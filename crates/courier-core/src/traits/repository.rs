//! Repository traits: the narrow slice of persistence the handlers touch.
//!
//! Getters return `Ok(None)` for a missing row: a task deleted before its job
//! fired is an intentional cancellation, not an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    EmailTemplateParts, ImmediateTask, ImmediateTaskStatus, NewScheduledTaskLog, ScheduledTask,
    TaskId,
};

#[async_trait]
pub trait ImmediateTaskRepository: Send + Sync {
    async fn get_by_id(&self, id: TaskId) -> Result<Option<ImmediateTask>>;

    async fn update_status(
        &self,
        id: TaskId,
        status: ImmediateTaskStatus,
        error_message: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait ScheduledTaskRepository: Send + Sync {
    async fn get_by_id(&self, id: TaskId) -> Result<Option<ScheduledTask>>;

    async fn update_url(&self, id: TaskId, url: &str) -> Result<()>;

    async fn update_previous_and_next_run(
        &self,
        id: TaskId,
        previous_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()>;
}

/// Append-only execution log.
#[async_trait]
pub trait ScheduledTaskLogRepository: Send + Sync {
    async fn create_log(&self, entry: &NewScheduledTaskLog) -> Result<i64>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Fails with `CourierError::NotFound` when the template is missing.
    async fn get_template_by_id(&self, id: i64) -> Result<EmailTemplateParts>;
}
