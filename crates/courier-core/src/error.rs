//! Courier error types.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CourierError>;

/// Errors raised by the queue, the handlers and their collaborators.
///
/// `Validation` and `Downstream` render their message verbatim so that the
/// text can be copied onto a task row without a prefix.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The task or job is malformed (missing template, bad content, bad cron).
    #[error("{0}")]
    Validation(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An outbound side effect failed (SMTP, webhook transport or status).
    #[error("{0}")]
    Downstream(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A scheduled firing that already ran, was logged and moved to its next
    /// slot. Redelivering it would replay the slot.
    #[error(transparent)]
    Settled(Box<CourierError>),
}

impl CourierError {
    /// Whether the queue should deliver the job again after this error.
    /// Malformed or missing records never are.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CourierError::Validation(_) | CourierError::NotFound(_) | CourierError::Settled(_)
        )
    }

    /// The underlying error, with any [`Settled`](CourierError::Settled)
    /// wrapper removed.
    pub fn root(&self) -> &CourierError {
        match self {
            CourierError::Settled(inner) => inner.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = CourierError::Validation("template_id is required".into());
        assert_eq!(err.to_string(), "template_id is required");
    }

    #[test]
    fn test_retry_classification() {
        assert!(!CourierError::Validation("bad".into()).is_retryable());
        assert!(!CourierError::NotFound("template 3".into()).is_retryable());
        assert!(CourierError::Downstream("smtp".into()).is_retryable());
        assert!(CourierError::Database("locked".into()).is_retryable());
    }

    #[test]
    fn test_settled_is_final_and_transparent() {
        let err = CourierError::Settled(Box::new(CourierError::Downstream("boom".into())));
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "boom");
        assert!(matches!(err.root(), CourierError::Downstream(_)));
    }
}
