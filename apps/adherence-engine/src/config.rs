use crate::baseline::Sensitivity;
use crate::scheduler::MIN_BATCH_INTERVAL_SECONDS;
use crate::service::ServicePolicy;
use crate::store::StoreKind;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreKind,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,

    pub default_sensitivity: Sensitivity,
    pub min_history_days: u64,
    pub training_window_days: u64,
    pub recent_window_days: u64,

    pub batch_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env is the normal case outside development.
        let _ = dotenvy::dotenv();

        let store = env_string("ADHERENCE_STORE", Some("sqlite".to_string()))?
            .parse::<StoreKind>()
            .map_err(|err| anyhow!("invalid ADHERENCE_STORE: {err}"))?;
        let data_dir = PathBuf::from(env_string("ADHERENCE_DATA_DIR", Some("./data".to_string()))?);
        let logs_dir = env_optional("ADHERENCE_LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));

        let default_sensitivity = env_string("ADHERENCE_DEFAULT_SENSITIVITY", Some("medium".to_string()))?
            .parse::<Sensitivity>()
            .context("invalid ADHERENCE_DEFAULT_SENSITIVITY")?;
        let min_history_days = env_u64("ADHERENCE_MIN_HISTORY_DAYS", Some(7))?;
        let training_window_days = env_u64("ADHERENCE_TRAINING_WINDOW_DAYS", Some(30))?;
        let recent_window_days = env_u64("ADHERENCE_RECENT_WINDOW_DAYS", Some(7))?;

        let batch_interval = Duration::from_secs(
            env_u64("ADHERENCE_BATCH_INTERVAL_SECONDS", Some(24 * 60 * 60))?
                .max(MIN_BATCH_INTERVAL_SECONDS),
        );

        Ok(Self {
            store,
            data_dir,
            logs_dir,
            default_sensitivity,
            min_history_days,
            training_window_days,
            recent_window_days,
            batch_interval,
        })
    }

    pub fn policy(&self) -> ServicePolicy {
        ServicePolicy {
            default_sensitivity: self.default_sensitivity,
            min_history_days: self.min_history_days,
            training_window_days: self.training_window_days,
            recent_window_days: self.recent_window_days,
        }
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
