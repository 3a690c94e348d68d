//! # Courier: durable task execution engine
//!
//! Runs the queue worker and offers producer-side commands for creating
//! tasks, inspecting the queue and reading execution logs.
//!
//! Usage:
//!   courier worker                                   # Process both lanes until Ctrl-C
//!   courier enqueue-immediate --template-id 1 --content "a@x.io;Ann"
//!   courier create-scheduled --cron "0 8 * * *" --url https://hooks.example.com/drop --user-id 5
//!   courier stats                                    # Job counts per lane

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use courier_channels::{HttpWebhookClient, SmtpMailer};
use courier_core::CourierConfig;
use courier_core::types::NewScheduledTask;
use courier_scheduler::{
    HandlerRegistry, ImmediateTaskHandler, JobQueue, LogSink, ScheduledTaskHandler, SqliteStore,
    TaskProducer, Worker,
};

#[derive(Parser)]
#[command(
    name = "courier",
    version,
    about = "📬 Courier: durable queue-backed email and webhook tasks"
)]
struct Cli {
    /// Config file (default: ~/.courier/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path, overriding the config file
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker until Ctrl-C
    Worker,

    /// Create a one-shot email task and queue it
    EnqueueImmediate {
        #[arg(long)]
        template_id: Option<i64>,

        /// "<recipient>;<var1>;<var2>;…"
        #[arg(long)]
        content: String,
    },

    /// Create a cron-recurring task and queue its first firing
    CreateScheduled {
        /// 5-field cron expression, UTC
        #[arg(long)]
        cron: String,

        /// Webhook called once (GET <url>/<user id>)
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        template_id: Option<i64>,

        #[arg(long, default_value = "")]
        content: String,

        #[arg(long)]
        user_id: Option<i64>,
    },

    /// Store an email template
    CreateTemplate {
        #[arg(long)]
        name: String,

        #[arg(long)]
        subject: String,

        /// HTML body; `{{1}}`, `{{2}}`, … are substituted
        #[arg(long)]
        body: String,
    },

    /// Re-arm the webhook of a scheduled task
    Reactivate { task_id: i64 },

    /// Delete a scheduled task; its queued firing becomes a no-op
    DeleteScheduled { task_id: i64 },

    /// List scheduled tasks with their run times
    ListScheduled,

    /// Job counts per lane
    Stats,

    /// Execution log of a scheduled task
    Logs { task_id: i64 },

    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(cli: &Cli) -> Result<CourierConfig> {
    let mut config = match &cli.config {
        Some(path) => CourierConfig::load_from(Path::new(&expand_path(path)))?,
        None => CourierConfig::load()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.database.path = db_path.clone();
    }
    Ok(config)
}

fn open_storage(config: &CourierConfig) -> Result<(Arc<SqliteStore>, Arc<JobQueue>)> {
    let db_path = PathBuf::from(expand_path(&config.database.path));
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening task store at {}", db_path.display()))?;
    let queue = JobQueue::open(&db_path, &config.queue)
        .with_context(|| format!("opening job queue at {}", db_path.display()))?;
    Ok((Arc::new(store), Arc::new(queue)))
}

async fn run_worker(config: &CourierConfig) -> Result<()> {
    let (store, queue) = open_storage(config)?;
    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    let webhook = Arc::new(HttpWebhookClient::new(&config.webhook)?);
    let logs = LogSink::new(store.clone(), config.worker.log_sink);

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(ImmediateTaskHandler::new(
        store.clone(),
        store.clone(),
        mailer.clone(),
    )));
    registry.register(Arc::new(
        ScheduledTaskHandler::new(store.clone(), store.clone(), mailer, webhook, logs.clone())
            .with_queue(queue.clone()),
    ));

    let worker = Worker::new(queue, registry, config.queue.clone(), &config.worker);

    println!("📬 Courier worker v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:  {}", expand_path(&config.database.path));
    println!(
        "   🛤️  Lanes:     immediate ×{}, default ×{}",
        config.queue.immediate_concurrency, config.queue.default_concurrency
    );
    println!("   📮 SMTP:      {}:{}", config.smtp.host, config.smtp.port);
    println!();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Ctrl-C received, draining in-flight jobs");
        }
        shutdown_tx.send(true).ok();
    });

    worker.run(shutdown_rx).await?;
    logs.flush().await;
    tracing::info!("📝 Execution log flushed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "courier=debug,courier_core=debug,courier_channels=debug,courier_scheduler=debug"
    } else {
        "courier=info,courier_core=info,courier_channels=info,courier_scheduler=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    if let Command::InitConfig { force } = &cli.command {
        let path = match &cli.config {
            Some(path) => PathBuf::from(expand_path(path)),
            None => CourierConfig::default_path(),
        };
        if path.exists() && !*force {
            println!("⚠️  {} already exists (use --force to overwrite)", path.display());
            return Ok(());
        }
        CourierConfig::default().save_to(&path)?;
        println!("✅ Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = load_config(&cli)?;

    match cli.command {
        Command::Worker => run_worker(&config).await?,
        Command::EnqueueImmediate {
            template_id,
            content,
        } => {
            let (store, queue) = open_storage(&config)?;
            let (task_id, job_id) =
                TaskProducer::new(store, queue).create_immediate_task(template_id, &content)?;
            println!("✅ Immediate task {task_id} queued (job #{job_id})");
        }
        Command::CreateScheduled {
            cron,
            url,
            template_id,
            content,
            user_id,
        } => {
            let (store, queue) = open_storage(&config)?;
            let task = NewScheduledTask {
                cron,
                url,
                template_id,
                content,
                user_id,
            };
            let task_id = TaskProducer::new(store.clone(), queue).create_scheduled_task(&task)?;
            let next_run = store
                .get_scheduled_task(task_id)?
                .and_then(|t| t.next_run)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            println!("✅ Scheduled task {task_id} created, first run at {next_run}");
        }
        Command::CreateTemplate {
            name,
            subject,
            body,
        } => {
            let (store, _) = open_storage(&config)?;
            let id = store.create_template(&name, &subject, &body)?;
            println!("✅ Template '{name}' stored with id {id}");
        }
        Command::Reactivate { task_id } => {
            let (store, queue) = open_storage(&config)?;
            if TaskProducer::new(store, queue).reactivate_webhook(task_id)? {
                println!("🔄 Webhook of scheduled task {task_id} re-armed");
            } else {
                println!("ℹ️  Scheduled task {task_id} has no completed webhook to re-arm");
            }
        }
        Command::DeleteScheduled { task_id } => {
            let (store, queue) = open_storage(&config)?;
            if TaskProducer::new(store, queue).delete_scheduled_task(task_id)? {
                println!("🗑️  Scheduled task {task_id} deleted");
            } else {
                println!("⚠️  Scheduled task {task_id} not found");
            }
        }
        Command::ListScheduled => {
            let (store, _) = open_storage(&config)?;
            println!("{}", serde_json::to_string_pretty(&store.list_scheduled_tasks()?)?);
        }
        Command::Stats => {
            let (_, queue) = open_storage(&config)?;
            println!("{}", serde_json::to_string_pretty(&queue.stats()?)?);
        }
        Command::Logs { task_id } => {
            let (store, _) = open_storage(&config)?;
            println!("{}", serde_json::to_string_pretty(&store.list_logs(task_id)?)?);
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}
