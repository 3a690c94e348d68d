//! # Courier Scheduler
//!
//! Durable, queue-backed execution of slow side effects: one-shot emails and
//! cron-recurring webhook/email tasks. Delivery is at-least-once; every
//! handler tolerates running twice for the same task.
//!
//! ## Architecture
//! ```text
//! TaskProducer
//!   ├── create_immediate_task  → immediate_tasks row + job "immediate:task" (lane immediate)
//!   └── create_scheduled_task  → scheduled_tasks row + job "scheduled:task"
//!                                 at next_run (lane default)
//!
//! JobQueue (SQLite, leased claims, retry with backoff)
//!   └── Worker: one poller per lane, semaphore-bounded
//!         ├── ImmediateTaskHandler → template + compose → Mailer
//!         └── ScheduledTaskHandler
//!               ├── webhook GET once, then "completed:" marker on the url
//!               ├── optional email
//!               ├── one execution log row (LogSink)
//!               └── RescheduleGuard → previous_run/next_run + next job
//! ```

pub mod compose;
pub mod cron;
pub mod handlers;
pub mod lanes;
pub mod log_sink;
pub mod persistence;
pub mod producer;
pub mod queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cron::{CronSchedule, next_run};
pub use handlers::{ImmediateTaskHandler, ScheduledTaskHandler};
pub use lanes::{Lane, LaneStats};
pub use log_sink::LogSink;
pub use persistence::SqliteStore;
pub use producer::TaskProducer;
pub use queue::{Job, JobQueue, JobState, RetryPolicy};
pub use worker::{HandlerRegistry, JobHandler, JobOutcome, Worker};
