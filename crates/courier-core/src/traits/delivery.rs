//! Outbound side-effect transports.

use async_trait::async_trait;

use crate::error::Result;

/// Sends a composed email. Bodies are trusted HTML.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Status and body of a webhook response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues webhook GETs. Transport failures are errors; any HTTP status,
/// including 4xx/5xx, is returned as a response.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<WebhookResponse>;
}
