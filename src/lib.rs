pub mod aggregates;
pub mod db;
pub mod errors;
pub mod hierarchy;
pub mod leveling;
pub mod models;
pub mod service;
pub mod settings;

pub use crate::errors::{AppError, AppResult};
pub use crate::leveling::{LevelCurve, PomodoroXpRule};
pub use crate::service::LifeQuestCore;
pub use crate::settings::{CoreConfig, EngineSettings, StoreConfig};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs JSON logging into a daily-rolling file under `log_dir`. `RUST_LOG` overrides the
/// default `info` filter. Calling it again after a subscriber is installed is a no-op.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "lifequest.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(format!("failed to install tracing subscriber: {}", error)))
}
