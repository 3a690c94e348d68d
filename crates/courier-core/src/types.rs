//! Task data model: the rows the worker reads and mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CourierError;

/// Primary key of a task row.
pub type TaskId = i64;

/// Primary key of a queued job.
pub type JobId = i64;

/// Prefix written onto a scheduled task's URL once its webhook returned 200.
pub const COMPLETED_MARKER: &str = "completed:";

/// Lifecycle of a one-shot task. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImmediateTaskStatus {
    Pending,
    Completed,
    Failed,
}

impl ImmediateTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImmediateTaskStatus::Pending => "pending",
            ImmediateTaskStatus::Completed => "completed",
            ImmediateTaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImmediateTaskStatus::Pending)
    }
}

impl std::fmt::Display for ImmediateTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImmediateTaskStatus {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImmediateTaskStatus::Pending),
            "completed" => Ok(ImmediateTaskStatus::Completed),
            "failed" => Ok(ImmediateTaskStatus::Failed),
            other => Err(CourierError::Validation(format!(
                "unknown immediate task status '{other}'"
            ))),
        }
    }
}

/// Outcome recorded on an execution log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(CourierError::Validation(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

/// A one-shot task, normally a transactional email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmediateTask {
    pub id: TaskId,
    pub template_id: Option<i64>,
    /// `"<recipient>;<var1>;<var2>;…"`
    pub content: String,
    pub status: ImmediateTaskStatus,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cron-recurring task: optional one-shot webhook plus optional email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub cron: String,
    /// Webhook URL, possibly carrying the [`COMPLETED_MARKER`] prefix.
    pub url: Option<String>,
    pub template_id: Option<i64>,
    pub content: String,
    pub user_id: Option<i64>,
    pub previous_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    /// The webhook URL still waiting for its first successful call, if any.
    pub fn pending_webhook(&self) -> Option<&str> {
        self.url
            .as_deref()
            .filter(|url| !url.is_empty() && !url.starts_with(COMPLETED_MARKER))
    }

    /// Whether the webhook phase already succeeded on an earlier firing.
    pub fn webhook_completed(&self) -> bool {
        self.url
            .as_deref()
            .is_some_and(|url| url.starts_with(COMPLETED_MARKER))
    }
}

/// Producer-side input for a new scheduled task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewScheduledTask {
    pub cron: String,
    pub url: Option<String>,
    pub template_id: Option<i64>,
    pub content: String,
    pub user_id: Option<i64>,
}

/// One execution attempt of a scheduled task, as written by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScheduledTaskLog {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub status: ExecutionStatus,
    pub http_status: u16,
    pub error: String,
}

/// A stored execution log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTaskLog {
    pub id: i64,
    pub task_id: TaskId,
    pub job_id: JobId,
    pub status: ExecutionStatus,
    pub http_status: u16,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// Subject and body templates with `{{1}}`, `{{2}}`, … placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplateParts {
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_url(url: Option<&str>) -> ScheduledTask {
        ScheduledTask {
            id: 1,
            cron: "0 0 * * *".into(),
            url: url.map(String::from),
            template_id: None,
            content: String::new(),
            user_id: None,
            previous_run: None,
            next_run: None,
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ImmediateTaskStatus::Pending,
            ImmediateTaskStatus::Completed,
            ImmediateTaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ImmediateTaskStatus>().unwrap(), status);
        }
        assert!("running".parse::<ImmediateTaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ImmediateTaskStatus::Pending.is_terminal());
        assert!(ImmediateTaskStatus::Completed.is_terminal());
        assert!(ImmediateTaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_pending_webhook_respects_marker() {
        assert_eq!(
            task_with_url(Some("http://x/drop/5")).pending_webhook(),
            Some("http://x/drop/5")
        );
        assert!(task_with_url(Some("completed:http://x/drop/5")).pending_webhook().is_none());
        assert!(task_with_url(Some("completed:http://x/drop/5")).webhook_completed());
        assert!(task_with_url(Some("")).pending_webhook().is_none());
        assert!(task_with_url(None).pending_webhook().is_none());
    }
}
