//! `immediate:task`: send one transactional email and record the outcome
//! on the task row.

use std::sync::Arc;

use async_trait::async_trait;

use courier_core::error::{CourierError, Result};
use courier_core::traits::{ImmediateTaskRepository, Mailer, TemplateRepository};
use courier_core::types::{ImmediateTask, ImmediateTaskStatus, TaskId};

use super::{IMMEDIATE_TASK, TEMPLATE_ID_REQUIRED, decode_task_id};
use crate::compose::{compose, parse_content};
use crate::queue::Job;
use crate::worker::JobHandler;

pub struct ImmediateTaskHandler {
    tasks: Arc<dyn ImmediateTaskRepository>,
    templates: Arc<dyn TemplateRepository>,
    mailer: Arc<dyn Mailer>,
}

impl ImmediateTaskHandler {
    pub fn new(
        tasks: Arc<dyn ImmediateTaskRepository>,
        templates: Arc<dyn TemplateRepository>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            tasks,
            templates,
            mailer,
        }
    }

    /// Run one task. A deleted row is a cancelled task and succeeds silently;
    /// a task that already completed is not sent twice.
    pub async fn process(&self, task_id: TaskId) -> Result<()> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            tracing::debug!("Immediate task {task_id} no longer exists; skipping");
            return Ok(());
        };
        if task.status == ImmediateTaskStatus::Completed {
            tracing::debug!("Immediate task {task_id} already completed; skipping");
            return Ok(());
        }

        match self.send(&task).await {
            Ok(recipient) => {
                self.tasks
                    .update_status(task_id, ImmediateTaskStatus::Completed, "")
                    .await?;
                tracing::info!("✉️ Immediate task {task_id} sent to {recipient}");
                Ok(())
            }
            Err(e) => self.mark_failed(task_id, e).await,
        }
    }

    async fn send(&self, task: &ImmediateTask) -> Result<String> {
        let template_id = task
            .template_id
            .ok_or_else(|| CourierError::Validation(TEMPLATE_ID_REQUIRED.into()))?;
        let template = self.templates.get_template_by_id(template_id).await?;
        let content = parse_content(&task.content)?;
        let email = compose(&template, &content.vars);
        self.mailer
            .send(&content.recipient, &email.subject, &email.body)
            .await?;
        Ok(content.recipient)
    }

    /// Record the failure on the row, then hand the original error back.
    async fn mark_failed(&self, task_id: TaskId, err: CourierError) -> Result<()> {
        let message = err.to_string();
        tracing::warn!("❌ Immediate task {task_id} failed: {message}");
        if let Err(update_err) = self
            .tasks
            .update_status(task_id, ImmediateTaskStatus::Failed, &message)
            .await
        {
            tracing::error!("Could not record failure on immediate task {task_id}: {update_err}");
        }
        Err(err)
    }
}

#[async_trait]
impl JobHandler for ImmediateTaskHandler {
    fn job_type(&self) -> &str {
        IMMEDIATE_TASK
    }

    async fn handle(&self, job: &Job) -> Result<()> {
        let task_id = decode_task_id(&job.payload)?;
        self.process(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::RECIPIENT_REQUIRED;
    use crate::persistence::SqliteStore;
    use crate::test_support::{RecordingMailer, SentEmail};

    struct Fixture {
        store: Arc<SqliteStore>,
        mailer: Arc<RecordingMailer>,
        handler: ImmediateTaskHandler,
    }

    fn fixture(mailer: RecordingMailer) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mailer = Arc::new(mailer);
        let handler = ImmediateTaskHandler::new(store.clone(), store.clone(), mailer.clone());
        Fixture {
            store,
            mailer,
            handler,
        }
    }

    fn welcome_template(store: &SqliteStore) -> i64 {
        store
            .create_template("welcome", "Hi {{1}}", "<p>Hi {{1}}, {{2}}</p>")
            .unwrap()
    }

    #[tokio::test]
    async fn test_sends_and_completes() {
        let f = fixture(RecordingMailer::new());
        let template = welcome_template(&f.store);
        let id = f
            .store
            .insert_immediate_task(Some(template), "a@x.io;Ann;hello")
            .unwrap();

        f.handler.process(id).await.unwrap();

        assert_eq!(
            f.mailer.sent(),
            vec![SentEmail {
                to: "a@x.io".into(),
                subject: "Hi Ann".into(),
                body: "<p>Hi Ann, hello</p>".into(),
            }]
        );
        let task = f.store.get_immediate_task(id).unwrap().unwrap();
        assert_eq!(task.status, ImmediateTaskStatus::Completed);
        assert_eq!(task.error_message, "");
    }

    #[tokio::test]
    async fn test_missing_template_id_fails_without_send() {
        let f = fixture(RecordingMailer::new());
        let id = f.store.insert_immediate_task(None, "a@x.io").unwrap();

        let err = f.handler.process(id).await.unwrap_err();
        assert_eq!(err.to_string(), TEMPLATE_ID_REQUIRED);
        assert!(f.mailer.sent().is_empty());

        let task = f.store.get_immediate_task(id).unwrap().unwrap();
        assert_eq!(task.status, ImmediateTaskStatus::Failed);
        assert_eq!(task.error_message, TEMPLATE_ID_REQUIRED);
    }

    #[tokio::test]
    async fn test_missing_recipient_fails() {
        let f = fixture(RecordingMailer::new());
        let template = welcome_template(&f.store);
        let id = f.store.insert_immediate_task(Some(template), " ;Ann").unwrap();

        let err = f.handler.process(id).await.unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
        let task = f.store.get_immediate_task(id).unwrap().unwrap();
        assert_eq!(task.status, ImmediateTaskStatus::Failed);
        assert_eq!(task.error_message, RECIPIENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_unknown_template_fails() {
        let f = fixture(RecordingMailer::new());
        let id = f.store.insert_immediate_task(Some(404), "a@x.io").unwrap();

        let err = f.handler.process(id).await.unwrap_err();
        assert!(matches!(err, CourierError::NotFound(_)));
        let task = f.store.get_immediate_task(id).unwrap().unwrap();
        assert_eq!(task.status, ImmediateTaskStatus::Failed);
        assert!(task.error_message.contains("email template 404"));
    }

    #[tokio::test]
    async fn test_smtp_failure_is_recorded_and_retryable() {
        let f = fixture(RecordingMailer::failing("SMTP send: connection refused"));
        let template = welcome_template(&f.store);
        let id = f.store.insert_immediate_task(Some(template), "a@x.io").unwrap();

        let err = f.handler.process(id).await.unwrap_err();
        assert!(err.is_retryable());
        let task = f.store.get_immediate_task(id).unwrap().unwrap();
        assert_eq!(task.status, ImmediateTaskStatus::Failed);
        assert_eq!(task.error_message, "SMTP send: connection refused");
    }

    #[tokio::test]
    async fn test_deleted_task_is_a_no_op() {
        let f = fixture(RecordingMailer::new());
        f.handler.process(999).await.unwrap();
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_sends_once() {
        let f = fixture(RecordingMailer::new());
        let template = welcome_template(&f.store);
        let id = f.store.insert_immediate_task(Some(template), "a@x.io").unwrap();

        f.handler.process(id).await.unwrap();
        f.handler.process(id).await.unwrap();
        assert_eq!(f.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_rejects_bad_payload() {
        let f = fixture(RecordingMailer::new());
        let job = Job {
            id: 1,
            job_type: IMMEDIATE_TASK.into(),
            payload: "not-a-number".into(),
            lane: crate::lanes::Lane::Immediate,
            state: crate::queue::JobState::Active,
            attempts: 1,
            max_retry: 3,
            run_at: chrono::Utc::now(),
            last_error: None,
        };
        let err = f.handler.handle(&job).await.unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }
}
