//! Courier configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CourierError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl CourierConfig {
    /// Load config from the default path (~/.courier/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CourierError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CourierError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Courier home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courier")
    }
}

/// SQLite database location (tasks, templates, logs and the job queue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.courier/courier.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Durable queue settings: lane concurrency, polling, leases and retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_immediate_concurrency")]
    pub immediate_concurrency: usize,
    #[serde(default = "default_default_concurrency")]
    pub default_concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a claimed job stays invisible before it is delivered again.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
}

fn default_immediate_concurrency() -> usize { 10 }
fn default_default_concurrency() -> usize { 5 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_lease_secs() -> u64 { 300 }
fn default_max_retry() -> u32 { 3 }
fn default_retry_base_secs() -> u64 { 10 }
fn default_retry_max_secs() -> u64 { 600 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            immediate_concurrency: default_immediate_concurrency(),
            default_concurrency: default_default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
            max_retry: default_max_retry(),
            retry_base_secs: default_retry_base_secs(),
            retry_max_secs: default_retry_max_secs(),
        }
    }
}

/// How scheduled-task execution log rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkMode {
    /// Awaited in the handler; failures are logged and swallowed.
    Inline,
    /// Spawned onto the runtime; the handler does not wait.
    #[default]
    Background,
}

/// Worker process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Deadline for a single handler invocation.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    #[serde(default)]
    pub log_sink: LogSinkMode,
}

fn default_handler_timeout_secs() -> u64 { 120 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
            log_sink: LogSinkMode::default(),
        }
    }
}

/// Outbound SMTP relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default = "bool_true")]
    pub starttls: bool,
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

fn bool_true() -> bool { true }
fn default_smtp_host() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_from_address() -> String { "no-reply@localhost".into() }
fn default_smtp_timeout_secs() -> u64 { 30 }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
            from_name: None,
            starttls: true,
            timeout_secs: default_smtp_timeout_secs(),
        }
    }
}

/// Outbound webhook calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout_secs() -> u64 { 30 }

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_secs: default_webhook_timeout_secs() }
    }
}
