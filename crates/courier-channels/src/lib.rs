//! Outbound delivery channels.
//!
//! Implementations of the core `Mailer` and `WebhookClient` traits. Both
//! bound every call with a configured timeout so a hung relay or endpoint
//! cannot pin a worker lane.

pub mod email;
pub mod webhook;

pub use email::SmtpMailer;
pub use webhook::HttpWebhookClient;
