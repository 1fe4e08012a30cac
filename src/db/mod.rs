pub mod store;

use crate::errors::{AppError, AppResult};
use crate::models::{Priority, ProjectStatus, SessionStatus, SessionType, SprintStatus, TaskStatus};
use crate::settings::{EngineSettings, StoreConfig};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");
const ENGINE_SETTINGS_KEY: &str = "engine";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    timeout: Duration,
    db_path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path, config: &StoreConfig, seed: &EngineSettings) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::from_connection(conn, config, seed, Some(path.to_path_buf()))
    }

    pub fn open_in_memory(config: &StoreConfig, seed: &EngineSettings) -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        Self::from_connection(conn, config, seed, None)
    }

    fn from_connection(
        conn: Connection,
        config: &StoreConfig,
        seed: &EngineSettings,
        db_path: Option<PathBuf>,
    ) -> AppResult<Self> {
        conn.busy_timeout(config.timeout())?;
        prepare_connection(&conn)?;
        ensure_engine_settings(&conn, seed)?;

        Ok(Self {
            conn: Mutex::new(conn),
            timeout: config.timeout(),
            db_path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn acquire(&self, op: &str) -> AppResult<MutexGuard<'_, Connection>> {
        tokio::time::timeout(self.timeout, self.conn.lock())
            .await
            .map_err(|_| {
                AppError::Unavailable(format!(
                    "store did not become available for '{}' within {} ms",
                    op,
                    self.timeout.as_millis()
                ))
            })
    }

    /// Runs `f` inside one IMMEDIATE transaction; an error from `f` rolls everything back.
    pub async fn write<T, F>(&self, op: &str, f: F) -> AppResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> AppResult<T> + Send,
        T: Send,
    {
        let mut conn = self.acquire(op).await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub async fn read<T, F>(&self, op: &str, f: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T> + Send,
        T: Send,
    {
        let conn = self.acquire(op).await?;
        f(&conn)
    }
}

/// Foreign keys, the `stamp_after(previous, now)` SQL function, and the schema.
pub(crate) fn prepare_connection(conn: &Connection) -> AppResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.create_scalar_function(
        "stamp_after",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let previous = parse_time(&ctx.get::<String>(0)?)?;
            let now = parse_time(&ctx.get::<String>(1)?)?;
            Ok(fmt_time(next_stamp(previous, now)))
        },
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

fn ensure_engine_settings(conn: &Connection, seed: &EngineSettings) -> AppResult<()> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM settings WHERE key = ?1",
        [ENGINE_SETTINGS_KEY],
        |row| row.get(0),
    )?;
    if count == 0 {
        save_engine_settings(conn, seed)?;
    }
    Ok(())
}

pub fn load_engine_settings(conn: &Connection) -> AppResult<EngineSettings> {
    let raw = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?1",
            [ENGINE_SETTINGS_KEY],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    match raw {
        Some(raw) => {
            let settings: EngineSettings = serde_json::from_str(&raw)?;
            settings.validate().map_err(|error| {
                AppError::Internal(format!("stored engine settings are invalid: {}", error))
            })?;
            Ok(settings)
        }
        None => Ok(EngineSettings::default()),
    }
}

pub fn save_engine_settings(conn: &Connection, settings: &EngineSettings) -> AppResult<()> {
    conn.execute(
        "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        params![ENGINE_SETTINGS_KEY, serde_json::to_string(settings)?, fmt_time(now())],
    )?;
    Ok(())
}

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Strictly later than `previous`, so `updatedAt` never goes backwards.
pub fn next_stamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

pub fn fmt_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn fmt_opt_time(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(fmt_time)
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

pub(crate) fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(0, error.to_string()))
}

pub(crate) fn parse_opt_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|raw| parse_time(&raw)).transpose()
}

pub(crate) fn parse_opt_date(raw: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    raw.map(|raw| {
        raw.parse::<NaiveDate>()
            .map_err(|error| conversion_error(0, error.to_string()))
    })
    .transpose()
}

pub(crate) fn parse_project_status(raw: &str) -> rusqlite::Result<ProjectStatus> {
    match raw {
        "active" => Ok(ProjectStatus::Active),
        "completed" => Ok(ProjectStatus::Completed),
        "on-hold" => Ok(ProjectStatus::OnHold),
        "cancelled" => Ok(ProjectStatus::Cancelled),
        other => Err(conversion_error(0, format!("Unknown project status '{}'", other))),
    }
}

pub(crate) fn parse_priority(raw: &str) -> rusqlite::Result<Priority> {
    match raw {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        other => Err(conversion_error(0, format!("Unknown priority '{}'", other))),
    }
}

pub(crate) fn parse_task_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    match raw {
        "todo" => Ok(TaskStatus::Todo),
        "in-progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        other => Err(conversion_error(0, format!("Unknown task status '{}'", other))),
    }
}

pub(crate) fn parse_session_type(raw: &str) -> rusqlite::Result<SessionType> {
    match raw {
        "work" => Ok(SessionType::Work),
        "short-break" => Ok(SessionType::ShortBreak),
        "long-break" => Ok(SessionType::LongBreak),
        other => Err(conversion_error(0, format!("Unknown session type '{}'", other))),
    }
}

pub(crate) fn parse_session_status(raw: &str) -> rusqlite::Result<SessionStatus> {
    match raw {
        "active" => Ok(SessionStatus::Active),
        "paused" => Ok(SessionStatus::Paused),
        "completed" => Ok(SessionStatus::Completed),
        "cancelled" => Ok(SessionStatus::Cancelled),
        other => Err(conversion_error(0, format!("Unknown session status '{}'", other))),
    }
}

pub(crate) fn parse_sprint_status(raw: &str) -> rusqlite::Result<SprintStatus> {
    match raw {
        "planned" => Ok(SprintStatus::Planned),
        "active" => Ok(SprintStatus::Active),
        "completed" => Ok(SprintStatus::Completed),
        other => Err(conversion_error(0, format!("Unknown sprint status '{}'", other))),
    }
}
