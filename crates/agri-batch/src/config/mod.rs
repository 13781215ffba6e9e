//! Configuration loading with layered sources.
//!
//! Precedence (lowest to highest): built-in defaults, `/etc/agri-batch`,
//! XDG config dir, `./config/settings.toml`, `AGRI_BATCH_CONFIG_FILE`, and
//! `AGRI_BATCH__SECTION__KEY` environment variables.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::constants::{
    DEFAULT_GEMINI_BASE_URL, DEFAULT_ID_FIELD, DEFAULT_MODEL, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_SUMMARY_FIELDS,
};
use crate::pipeline::request::GenerationSettings;

const LOCAL_CONFIG_FILE: &str = "config/settings";
const SETTINGS_FILE_NAME: &str = "settings.toml";
const ENV_PREFIX: &str = "AGRI_BATCH";
const ENV_CONFIG_FILE: &str = "AGRI_BATCH_CONFIG_FILE";
const ENV_ETC_DIR: &str = "AGRI_BATCH_ETC_CONFIG_DIR";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub generation: GenerationSettings,
    pub polling: PollingConfig,
    pub records: RecordsConfig,
    pub reconcile: ReconcileConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Client-side cap on provider calls; unset means unlimited.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub interval_secs: u64,
    /// Give up waiting after this many seconds; unset waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordsConfig {
    pub id_field: String,
    pub summary_fields: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    pub accept_value: JsonValue,
    /// Write missing decisions to `missing.jsonl` instead of `rejected.jsonl`.
    pub split_missing: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub root: PathBuf,
}

impl AppConfig {
    /// Structural checks only; values are passed through to the provider as-is.
    pub fn validate(&self) -> Result<(), AppConfigError> {
        if self.provider.model.trim().is_empty() {
            return Err(AppConfigError::Invalid(
                "provider.model must not be empty".to_string(),
            ));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(AppConfigError::Invalid(
                "provider.base_url must not be empty".to_string(),
            ));
        }
        if self.polling.interval_secs == 0 {
            return Err(AppConfigError::Invalid(
                "polling.interval_secs must be > 0".to_string(),
            ));
        }
        if self.records.id_field.trim().is_empty() {
            return Err(AppConfigError::Invalid(
                "records.id_field must not be empty".to_string(),
            ));
        }
        self.generation
            .validate()
            .map_err(|err| AppConfigError::Invalid(err.to_string()))
    }
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let summary_fields: Vec<String> = DEFAULT_SUMMARY_FIELDS
        .iter()
        .map(|field| field.to_string())
        .collect();

    let mut builder = Config::builder()
        .set_default("provider.base_url", DEFAULT_GEMINI_BASE_URL)?
        .set_default("provider.model", DEFAULT_MODEL)?
        .set_default("generation.temperature", 0.2)?
        .set_default("generation.include_thoughts", true)?
        .set_default("generation.response_mime_type", "application/json")?
        .set_default("polling.interval_secs", DEFAULT_POLL_INTERVAL_SECS)?
        .set_default("records.id_field", DEFAULT_ID_FIELD)?
        .set_default("records.summary_fields", summary_fields)?
        .set_default("reconcile.accept_value", 1)?
        .set_default("reconcile.split_missing", false)?
        .set_default("output.root", "output")?;

    let etc_root = std::env::var_os(ENV_ETC_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc"));
    builder = builder.add_source(
        File::from(etc_root.join("agri-batch").join(SETTINGS_FILE_NAME)).required(false),
    );

    if let Some(dirs) = project_dirs() {
        builder = builder
            .add_source(File::from(dirs.config_dir().join(SETTINGS_FILE_NAME)).required(false));
    }

    builder = builder.add_source(File::with_name(LOCAL_CONFIG_FILE).required(false));

    if let Some(explicit) = std::env::var_os(ENV_CONFIG_FILE) {
        builder = builder.add_source(File::from(PathBuf::from(explicit)).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "agri", "agri-batch")
}
