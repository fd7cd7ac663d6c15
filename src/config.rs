//! Configuration loader and validator for the registry sync engine.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub registry: Registry,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Default cap used by retry sweeps when the caller gives none.
    pub max_attempts: i64,
    /// Number of entities synchronized at once inside one batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// External registry endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registry {
    pub base_url: String,
    pub api_key: String,
    pub university_id: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/pddikti.db", self.app.resolved_data_dir()))
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Registry {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.max_attempts <= 0 {
        return Err(ConfigError::Invalid("app.max_attempts must be > 0"));
    }
    if cfg.app.concurrency == 0 {
        return Err(ConfigError::Invalid("app.concurrency must be > 0"));
    }

    if Url::parse(&cfg.registry.base_url).is_err() {
        return Err(ConfigError::Invalid("registry.base_url must be a valid URL"));
    }
    if cfg.registry.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("registry.api_key must be non-empty"));
    }
    if cfg.registry.university_id.trim().is_empty() {
        return Err(ConfigError::Invalid("registry.university_id must be non-empty"));
    }
    if cfg.registry.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("registry.timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the binary.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  max_attempts: 3
  concurrency: 1

registry:
  base_url: "https://api-pddikti.kemdikbud.go.id/v1/"
  api_key: "YOUR_PDDIKTI_API_KEY"
  university_id: "YOUR_UNIVERSITY_ID"
  timeout_seconds: 30
"#
}
