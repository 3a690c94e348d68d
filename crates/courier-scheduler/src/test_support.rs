//! In-memory fakes for the delivery traits.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use courier_core::error::{CourierError, Result};
use courier_core::traits::{Mailer, WebhookClient, WebhookResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    fail_with: Option<String>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            sent: Mutex::default(),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        if let Some(message) = &self.fail_with {
            return Err(CourierError::Downstream(message.clone()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(())
    }
}

/// Replays scripted responses in order; answers 200 once the script runs out.
#[derive(Default)]
pub struct StubWebhook {
    script: Mutex<VecDeque<std::result::Result<WebhookResponse, String>>>,
    calls: Mutex<Vec<String>>,
    latency: Duration,
}

impl StubWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16, body: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(WebhookResponse {
            status,
            body: body.to_string(),
        }));
        self
    }

    pub fn refuse(self, error: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(error.to_string()));
        self
    }

    /// Answer every call only after `latency`.
    pub fn delayed(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookClient for StubWebhook {
    async fn get(&self, url: &str) -> Result<WebhookResponse> {
        self.calls.lock().unwrap().push(url.to_string());
        tokio::time::sleep(self.latency).await;
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(CourierError::Downstream(error)),
            None => Ok(WebhookResponse {
                status: 200,
                body: String::new(),
            }),
        }
    }
}
