use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = ".hrsync/config.toml";
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";
pub const DATABASE_FILE: &str = "hrsync.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrSyncConfig {
    pub workspace_dir: PathBuf,
    pub log_level: String,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    #[default]
    Disabled,
    OpenAi,
    Ollama,
    Custom,
}

/// Chat model used by the generative schema and plan strategies.
///
/// With `provider = "disabled"` (or a missing API key for hosted providers) only the
/// deterministic strategies run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ModelProvider,
    pub model_id: String,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Disabled,
            model_id: "gpt-4o-mini".to_string(),
            endpoint: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn resolved_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        match self.provider {
            ModelProvider::OpenAi => Some("https://api.openai.com/v1".to_string()),
            ModelProvider::Ollama => Some("http://127.0.0.1:11434/v1".to_string()),
            ModelProvider::Custom | ModelProvider::Disabled => None,
        }
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        let key_env = self.api_key_env.as_deref()?;
        env::var(key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
    #[serde(default = "default_sheets_token_env")]
    pub access_token_env: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            base_url: default_sheets_base_url(),
            access_token_env: default_sheets_token_env(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Cron expression with a seconds field, evaluated in UTC.
    #[serde(default = "default_sweep_schedule")]
    pub schedule: String,
    #[serde(default = "default_reminder_hours")]
    pub reminder_after_hours: u32,
    #[serde(default = "default_escalate_hours")]
    pub escalate_after_hours: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            schedule: default_sweep_schedule(),
            reminder_after_hours: default_reminder_hours(),
            escalate_after_hours: default_escalate_hours(),
        }
    }
}

impl Default for HrSyncConfig {
    fn default() -> Self {
        let workspace_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hrsync");

        Self {
            workspace_dir,
            log_level: "info".to_string(),
            model: ModelConfig::default(),
            sheets: SheetsConfig::default(),
            sync: SyncConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

fn default_model_timeout_secs() -> u64 {
    30
}

fn default_sheets_base_url() -> String {
    DEFAULT_SHEETS_BASE_URL.to_string()
}

fn default_sheets_token_env() -> String {
    "GOOGLE_SHEETS_TOKEN".to_string()
}

fn default_max_retries() -> u8 {
    2
}

fn default_sweep_schedule() -> String {
    "0 0 * * * *".to_string()
}

fn default_reminder_hours() -> u32 {
    48
}

fn default_escalate_hours() -> u32 {
    72
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("config has invalid value: {0}")]
    ValidationFailed(String),
}

impl HrSyncConfig {
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = env::var("HRSYNC_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        self.workspace_dir.join(DATABASE_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_or_create() -> Result<(Self, PathBuf, bool), ConfigError> {
        let path = Self::resolve_path();
        if path.exists() {
            let cfg = Self::load(&path)?;
            return Ok((cfg, path, false));
        }

        let cfg = Self::default();
        cfg.save(&path)?;
        Ok((cfg, path, true))
    }

    pub fn validate_and_prepare(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "log_level cannot be empty".to_string(),
            ));
        }
        if self.model.provider != ModelProvider::Disabled {
            if self.model.model_id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "model.model_id cannot be empty".to_string(),
                ));
            }
            if self.model.resolved_endpoint().is_none() {
                return Err(ConfigError::ValidationFailed(
                    "model.endpoint is required for custom providers".to_string(),
                ));
            }
        }
        if self.sheets.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sheets.base_url cannot be empty".to_string(),
            ));
        }
        if cron::Schedule::from_str(&self.sweep.schedule).is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "sweep.schedule is not a valid cron expression: {}",
                self.sweep.schedule
            )));
        }
        if self.sweep.reminder_after_hours >= self.sweep.escalate_after_hours {
            return Err(ConfigError::ValidationFailed(
                "sweep.reminder_after_hours must be below sweep.escalate_after_hours".to_string(),
            ));
        }
        fs::create_dir_all(&self.workspace_dir).map_err(|source| ConfigError::WriteFailed {
            path: self.workspace_dir.clone(),
            source,
        })?;
        Ok(())
    }
}
