//! Collaborator traits consumed by the worker.

pub mod delivery;
pub mod repository;

pub use delivery::{Mailer, WebhookClient, WebhookResponse};
pub use repository::{
    ImmediateTaskRepository, ScheduledTaskLogRepository, ScheduledTaskRepository,
    TemplateRepository,
};
