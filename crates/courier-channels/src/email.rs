//! Email channel: SMTP sending via async lettre.

use async_trait::async_trait;
use courier_core::config::SmtpConfig;
use courier_core::error::{CourierError, Result};
use courier_core::traits::Mailer;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use std::time::Duration;

/// SMTP mailer. The transport keeps a connection pool, so build one per process.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from = sender_mailbox(config)?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| CourierError::Config(format!("SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        tracing::info!(
            "📮 SMTP mailer ready: {}:{} (starttls: {})",
            config.host,
            config.port,
            config.starttls
        );

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }

    /// Build the HTML message without sending it.
    pub fn build_message(&self, to: &str, subject: &str, html_body: &str) -> Result<LettreMessage> {
        build_message(&self.from, to, subject, html_body)
    }
}

fn sender_mailbox(config: &SmtpConfig) -> Result<Mailbox> {
    let raw = match &config.from_name {
        Some(name) => format!("{name} <{}>", config.from_address),
        None => config.from_address.clone(),
    };
    raw.parse()
        .map_err(|e| CourierError::Config(format!("Invalid from address: {e}")))
}

fn build_message(
    from: &Mailbox,
    to: &str,
    subject: &str,
    html_body: &str,
) -> Result<LettreMessage> {
    let to_mailbox: Mailbox = to
        .parse()
        .map_err(|e| CourierError::Downstream(format!("Invalid recipient '{to}': {e}")))?;

    LettreMessage::builder()
        .from(from.clone())
        .to(to_mailbox)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html_body.to_string())
        .map_err(|e| CourierError::Downstream(format!("Build email: {e}")))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        let email = self.build_message(to, subject, html_body)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| CourierError::Downstream(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}
