//! Best-effort writer for the scheduled-task execution log.
//!
//! A failed log insert is reported through `tracing` and otherwise dropped:
//! the handler's own outcome never depends on it. Background writes are
//! tracked so that shutdown can [`flush`](LogSink::flush) them.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use courier_core::config::LogSinkMode;
use courier_core::traits::ScheduledTaskLogRepository;
use courier_core::types::NewScheduledTaskLog;

/// Clones share the same set of pending writes.
#[derive(Clone)]
pub struct LogSink {
    repo: Arc<dyn ScheduledTaskLogRepository>,
    mode: LogSinkMode,
    pending: TaskTracker,
}

impl LogSink {
    pub fn new(repo: Arc<dyn ScheduledTaskLogRepository>, mode: LogSinkMode) -> Self {
        Self {
            repo,
            mode,
            pending: TaskTracker::new(),
        }
    }

    pub fn mode(&self) -> LogSinkMode {
        self.mode
    }

    /// Record one execution row. Never fails.
    pub async fn record(&self, entry: NewScheduledTaskLog) {
        match self.mode {
            LogSinkMode::Inline => write(self.repo.as_ref(), entry).await,
            LogSinkMode::Background => {
                let repo = self.repo.clone();
                self.pending.spawn(async move { write(repo.as_ref(), entry).await });
            }
        }
    }

    /// Run `work` on `handle` as a pending write, so `flush` waits for it.
    pub(crate) fn spawn_on<F>(&self, work: F, handle: &Handle)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.spawn_on(work, handle);
    }

    /// Wait until every write started so far has landed.
    pub async fn flush(&self) {
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }
}

async fn write(repo: &dyn ScheduledTaskLogRepository, entry: NewScheduledTaskLog) {
    match repo.create_log(&entry).await {
        Ok(id) => tracing::debug!(
            "📝 Execution log #{id}: task {} job {} {} ({})",
            entry.task_id,
            entry.job_id,
            entry.status,
            entry.http_status
        ),
        Err(e) => tracing::warn!(
            "⚠️ Failed to write execution log for task {} (job {}): {e}",
            entry.task_id,
            entry.job_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::error::{CourierError, Result};
    use courier_core::types::ExecutionStatus;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryLogs {
        rows: Mutex<Vec<NewScheduledTaskLog>>,
        broken: bool,
        latency: Duration,
    }

    #[async_trait]
    impl ScheduledTaskLogRepository for MemoryLogs {
        async fn create_log(&self, entry: &NewScheduledTaskLog) -> Result<i64> {
            tokio::time::sleep(self.latency).await;
            if self.broken {
                return Err(CourierError::Database("disk full".into()));
            }
            let mut rows = self.rows.lock().unwrap();
            rows.push(entry.clone());
            Ok(rows.len() as i64)
        }
    }

    fn entry() -> NewScheduledTaskLog {
        NewScheduledTaskLog {
            task_id: 1,
            job_id: 2,
            status: ExecutionStatus::Completed,
            http_status: 200,
            error: String::new(),
        }
    }

    #[tokio::test]
    async fn test_inline_writes_before_returning() {
        let repo = Arc::new(MemoryLogs::default());
        let sink = LogSink::new(repo.clone(), LogSinkMode::Inline);
        sink.record(entry()).await;
        assert_eq!(repo.rows.lock().unwrap().as_slice(), &[entry()]);
    }

    #[tokio::test]
    async fn test_background_write_lands_on_flush() {
        let repo = Arc::new(MemoryLogs {
            latency: Duration::from_millis(100),
            ..MemoryLogs::default()
        });
        let sink = LogSink::new(repo.clone(), LogSinkMode::Background);
        sink.record(entry()).await;
        assert!(repo.rows.lock().unwrap().is_empty());

        sink.clone().flush().await;
        assert_eq!(repo.rows.lock().unwrap().as_slice(), &[entry()]);

        // Still usable after a flush
        sink.record(entry()).await;
        sink.flush().await;
        assert_eq!(repo.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_flush_waits_for_spawned_work() {
        let repo = Arc::new(MemoryLogs::default());
        let sink = LogSink::new(repo.clone(), LogSinkMode::Background);
        let inner = sink.clone();
        sink.spawn_on(
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                inner.record(entry()).await;
            },
            &Handle::current(),
        );

        sink.flush().await;
        assert_eq!(repo.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let repo = Arc::new(MemoryLogs {
            broken: true,
            ..MemoryLogs::default()
        });
        let sink = LogSink::new(repo.clone(), LogSinkMode::Inline);
        sink.record(entry()).await;
        assert!(repo.rows.lock().unwrap().is_empty());
    }
}
