//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use std::time::Duration;

/// Shopbot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path.
    pub data_dir: std::path::PathBuf,

    /// Model endpoint configuration.
    pub model: ModelConfig,

    /// Dispatch behavior settings.
    pub dispatch: DispatchConfig,
}

/// Model endpoint configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model name sent to the generation endpoint.
    pub model_name: String,

    /// Google API key for the Gemini endpoint.
    pub google_api_key: Option<String>,

    /// Base URL of the generation API.
    pub base_url: String,
}

/// Dispatch behavior configuration.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Maximum agent invocation attempts per task.
    pub max_attempts: u32,

    /// Base delay for the retry backoff schedule.
    pub base_delay: Duration,

    /// Deadline for a single agent invocation attempt.
    pub attempt_timeout: Duration,

    /// How many past exchanges to feed the agent as conversation memory.
    pub history_limit: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(120),
            history_limit: 8,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("shopbot"))
            .unwrap_or_else(|| std::path::PathBuf::from("./data"));

        // Ensure data directory exists
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let model = ModelConfig {
            model_name: std::env::var("SHOPBOT_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".into()),
            google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
            base_url: std::env::var("SHOPBOT_MODEL_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
        };

        if model.model_name.is_empty() {
            return Err(ConfigError::Invalid("SHOPBOT_MODEL must not be empty".into()).into());
        }

        Ok(Self {
            data_dir,
            model,
            dispatch: DispatchConfig::default(),
        })
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> std::path::PathBuf {
        self.data_dir.join("shopbot.db")
    }
}
