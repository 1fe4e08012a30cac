use crate::errors::{AppError, AppResult};
use crate::leveling::{LevelCurve, PomodoroXpRule};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TASK_XP: i64 = 25;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub store: StoreConfig,
    pub engine: EngineSettings,
}

impl CoreConfig {
    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.store.timeout_ms == 0 {
            return Err(AppError::Validation("store.timeoutMs must be greater than zero".to_string()));
        }
        self.engine.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Upper bound for waiting on the store, in milliseconds.
    pub timeout_ms: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

/// Tunables read by the XP engine; persisted in the `settings` table under `engine`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub leveling: LevelCurve,
    pub pomodoro: PomodoroXpRule,
    pub default_task_xp: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            leveling: LevelCurve::default(),
            pomodoro: PomodoroXpRule::default(),
            default_task_xp: DEFAULT_TASK_XP,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> AppResult<()> {
        self.leveling.validate()?;
        self.pomodoro.validate()?;
        if self.default_task_xp < 0 {
            return Err(AppError::Validation("defaultTaskXp must not be negative".to_string()));
        }
        Ok(())
    }

    /// Deep-merges a JSON patch over these settings and validates the result.
    pub fn merged(&self, update: serde_json::Value) -> AppResult<Self> {
        if !update.is_object() {
            return Err(AppError::Validation("settings update must be a JSON object".to_string()));
        }
        let mut merged = serde_json::to_value(self)?;
        merge_json(&mut merged, update);
        let settings: Self = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("invalid settings: {}", error)))?;
        settings.validate()?;
        Ok(settings)
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
