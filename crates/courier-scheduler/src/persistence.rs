//! SQLite-backed persistence for tasks, email templates and execution logs.
//! Implements the repository traits the handlers consume; the producer-side
//! inserts live here too so tests and the CLI share one schema.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use courier_core::error::{CourierError, Result};
use courier_core::traits::{
    ImmediateTaskRepository, ScheduledTaskLogRepository, ScheduledTaskRepository,
    TemplateRepository,
};
use courier_core::types::{
    EmailTemplateParts, ImmediateTask, ImmediateTaskStatus, NewScheduledTask,
    NewScheduledTaskLog, ScheduledTask, ScheduledTaskLog, TaskId,
};

/// Fixed-width UTC timestamp, so text comparison in SQL orders correctly.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Read a TEXT column into a closed enum.
pub(crate) fn text_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CourierError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: CourierError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a TEXT timestamp column.
pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp '{raw}'").into(),
        )
    })
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_ts))
}

/// Open a connection tuned for a single worker process sharing the file
/// with producers.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path).map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    // journal_mode returns a row; in-memory databases answer "memory"
    conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get::<_, String>(0))
        .ok();
    Ok(conn)
}

fn db_err(e: rusqlite::Error) -> CourierError {
    CourierError::Database(e.to_string())
}

const IMMEDIATE_COLUMNS: &str =
    "id, template_id, content, status, error_message, created_at, updated_at";
const SCHEDULED_COLUMNS: &str =
    "id, cron, url, template_id, content, user_id, previous_run, next_run";

fn immediate_from_row(row: &Row<'_>) -> rusqlite::Result<ImmediateTask> {
    Ok(ImmediateTask {
        id: row.get(0)?,
        template_id: row.get(1)?,
        content: row.get(2)?,
        status: text_enum(row, 3)?,
        error_message: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

fn scheduled_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get(0)?,
        cron: row.get(1)?,
        url: row.get(2)?,
        template_id: row.get(3)?,
        content: row.get(4)?,
        user_id: row.get(5)?,
        previous_run: optional_timestamp(row, 6)?,
        next_run: optional_timestamp(row, 7)?,
    })
}

/// SQLite store for everything except the job queue.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(open_connection(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS email_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- One-shot tasks
            CREATE TABLE IF NOT EXISTS immediate_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id INTEGER,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',   -- pending, completed, failed
                error_message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Cron-recurring tasks
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cron TEXT NOT NULL,
                url TEXT,                                 -- may carry the 'completed:' marker
                template_id INTEGER,
                content TEXT NOT NULL DEFAULT '',
                user_id INTEGER,
                previous_run TEXT,
                next_run TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Append-only execution log
            CREATE TABLE IF NOT EXISTS scheduled_task_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                job_id INTEGER NOT NULL,
                status TEXT NOT NULL,                     -- completed, failed
                http_status INTEGER NOT NULL DEFAULT 0,
                error TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_task_logs_task
                ON scheduled_task_logs(task_id);
         ",
            )
            .map_err(|e| CourierError::Database(format!("Migration: {e}")))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CourierError::Database(e.to_string()))
    }

    // ─── Templates ───────────────────────────────────────────

    pub fn create_template(&self, name: &str, subject: &str, body: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO email_templates (name, subject, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, subject, body, ts(Utc::now())],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_template(&self, id: i64) -> Result<Option<EmailTemplateParts>> {
        self.conn()?
            .query_row(
                "SELECT subject, body FROM email_templates WHERE id = ?1",
                [id],
                |row| {
                    Ok(EmailTemplateParts {
                        subject: row.get(0)?,
                        body: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    // ─── Immediate Tasks ─────────────────────────────────────

    /// Insert a Pending one-shot task.
    pub fn insert_immediate_task(&self, template_id: Option<i64>, content: &str) -> Result<TaskId> {
        let conn = self.conn()?;
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO immediate_tasks (template_id, content, status, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, '', ?4, ?4)",
            rusqlite::params![template_id, content, ImmediateTaskStatus::Pending.as_str(), now],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_immediate_task(&self, id: TaskId) -> Result<Option<ImmediateTask>> {
        self.conn()?
            .query_row(
                &format!("SELECT {IMMEDIATE_COLUMNS} FROM immediate_tasks WHERE id = ?1"),
                [id],
                immediate_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    pub fn set_immediate_status(
        &self,
        id: TaskId,
        status: ImmediateTaskStatus,
        error_message: &str,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE immediate_tasks SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, status.as_str(), error_message, ts(Utc::now())],
            )
            .map_err(db_err)?;
        Ok(())
    }

    // ─── Scheduled Tasks ─────────────────────────────────────

    pub fn insert_scheduled_task(
        &self,
        task: &NewScheduledTask,
        next_run: DateTime<Utc>,
    ) -> Result<TaskId> {
        let conn = self.conn()?;
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO scheduled_tasks
             (cron, url, template_id, content, user_id, previous_run, next_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?7)",
            rusqlite::params![
                task.cron,
                task.url,
                task.template_id,
                task.content,
                task.user_id,
                ts(next_run),
                now,
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_scheduled_task(&self, id: TaskId) -> Result<Option<ScheduledTask>> {
        self.conn()?
            .query_row(
                &format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                [id],
                scheduled_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    pub fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_tasks ORDER BY id"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], scheduled_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn set_scheduled_url(&self, id: TaskId, url: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE scheduled_tasks SET url = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, url, ts(Utc::now())],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn set_scheduled_runs(
        &self,
        id: TaskId,
        previous_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE scheduled_tasks SET previous_run = ?2, next_run = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, ts(previous_run), ts(next_run), ts(Utc::now())],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Delete a scheduled task. Returns whether a row was removed.
    pub fn delete_scheduled_task(&self, id: TaskId) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", [id])
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    // ─── Execution Logs ──────────────────────────────────────

    pub fn insert_log(&self, entry: &NewScheduledTaskLog) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduled_task_logs (task_id, job_id, status, http_status, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.task_id,
                entry.job_id,
                entry.status.as_str(),
                entry.http_status,
                entry.error,
                ts(Utc::now()),
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Log rows for a task, oldest first.
    pub fn list_logs(&self, task_id: TaskId) -> Result<Vec<ScheduledTaskLog>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, job_id, status, http_status, error, created_at
                 FROM scheduled_task_logs WHERE task_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([task_id], |row| {
                Ok(ScheduledTaskLog {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    job_id: row.get(2)?,
                    status: text_enum(row, 3)?,
                    http_status: row.get(4)?,
                    error: row.get(5)?,
                    created_at: timestamp(row, 6)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}

#[async_trait]
impl ImmediateTaskRepository for SqliteStore {
    async fn get_by_id(&self, id: TaskId) -> Result<Option<ImmediateTask>> {
        self.get_immediate_task(id)
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: ImmediateTaskStatus,
        error_message: &str,
    ) -> Result<()> {
        self.set_immediate_status(id, status, error_message)
    }
}

#[async_trait]
impl ScheduledTaskRepository for SqliteStore {
    async fn get_by_id(&self, id: TaskId) -> Result<Option<ScheduledTask>> {
        self.get_scheduled_task(id)
    }

    async fn update_url(&self, id: TaskId, url: &str) -> Result<()> {
        self.set_scheduled_url(id, url)
    }

    async fn update_previous_and_next_run(
        &self,
        id: TaskId,
        previous_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        self.set_scheduled_runs(id, previous_run, next_run)
    }
}

#[async_trait]
impl ScheduledTaskLogRepository for SqliteStore {
    async fn create_log(&self, entry: &NewScheduledTaskLog) -> Result<i64> {
        self.insert_log(entry)
    }
}

#[async_trait]
impl TemplateRepository for SqliteStore {
    async fn get_template_by_id(&self, id: i64) -> Result<EmailTemplateParts> {
        self.get_template(id)?
            .ok_or_else(|| CourierError::NotFound(format!("email template {id}")))
    }
}
