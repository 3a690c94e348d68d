//! Job handlers: one per job type the worker serves.

pub mod immediate;
pub mod scheduled;

pub use immediate::ImmediateTaskHandler;
pub use scheduled::{RescheduleGuard, ScheduledTaskHandler};

use chrono::{DateTime, Utc};

use courier_core::error::{CourierError, Result};
use courier_core::types::TaskId;

/// Job type of one-shot email tasks (lane `immediate`).
pub const IMMEDIATE_TASK: &str = "immediate:task";

/// Job type of cron-recurring tasks (lane `default`).
pub const SCHEDULED_TASK: &str = "scheduled:task";

pub const TEMPLATE_ID_REQUIRED: &str = "template_id is required";

/// Job payloads are the decimal task id.
pub fn decode_task_id(payload: &str) -> Result<TaskId> {
    payload
        .trim()
        .parse()
        .map_err(|_| CourierError::Validation(format!("invalid task id payload '{payload}'")))
}

/// Unique key of the job that fires `task_id` at `run_at`. Enqueueing the
/// same firing twice is a no-op.
pub fn scheduled_job_key(task_id: TaskId, run_at: DateTime<Utc>) -> String {
    format!("{SCHEDULED_TASK}:{task_id}:{}", run_at.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_task_id() {
        assert_eq!(decode_task_id("42").unwrap(), 42);
        assert_eq!(decode_task_id(" 7\n").unwrap(), 7);
        let err = decode_task_id("abc").unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_scheduled_job_key() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(scheduled_job_key(5, at), "scheduled:task:5:1704153600");
    }
}
