//! Scraper configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. String values may reference environment variables as
//! `${VAR}`; they are expanded before the TOML is parsed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::ViewportSize;
use crate::webdriver::BrowserType;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),
    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub browser: BrowserConfig,
    pub timeouts: TimeoutConfig,
    pub limits: LimitConfig,
    pub retry: RetryConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// `chrome` or `firefox`
    pub browser: String,
    pub headless: bool,
    /// WIDTHxHEIGHT
    pub viewport: String,
    /// Connect to an already running WebDriver instead of starting one
    pub webdriver_url: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser: "chrome".to_string(),
            headless: true,
            viewport: "1920x1080".to_string(),
            webdriver_url: None,
        }
    }
}

impl BrowserConfig {
    pub fn browser_type(&self) -> Result<BrowserType, ConfigError> {
        self.browser.parse().map_err(|e: anyhow::Error| ConfigError::Invalid {
            field: "browser.browser".to_string(),
            message: e.to_string(),
        })
    }

    pub fn viewport_size(&self) -> Result<ViewportSize, ConfigError> {
        ViewportSize::parse(&self.viewport).map_err(|e| ConfigError::Invalid {
            field: "browser.viewport".to_string(),
            message: e.to_string(),
        })
    }
}

/// Per-operation timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub navigation: u64,
    pub interaction: u64,
    pub frame_load: u64,
    pub overlay_search: u64,
    /// Pause after a successful interaction before draining changes
    pub settle: u64,
    /// Bound on element discovery plus the interaction loop
    pub session_deadline: u64,
    pub model: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation: 30_000,
            interaction: 5_000,
            frame_load: 5_000,
            overlay_search: 3_000,
            settle: 1_000,
            session_deadline: 180_000,
            model: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation)
    }

    pub fn interaction(&self) -> Duration {
        Duration::from_millis(self.interaction)
    }

    pub fn frame_load(&self) -> Duration {
        Duration::from_millis(self.frame_load)
    }

    pub fn overlay_search(&self) -> Duration {
        Duration::from_millis(self.overlay_search)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle)
    }

    pub fn session_deadline(&self) -> Duration {
        Duration::from_millis(self.session_deadline)
    }

    pub fn model(&self) -> Duration {
        Duration::from_millis(self.model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Snapshots larger than this skip model discovery entirely
    pub max_snapshot_chars: usize,
    pub max_candidates: usize,
    pub max_scroll_rounds: u32,
    /// Pause between scroll rounds, in milliseconds
    pub scroll_pause: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_snapshot_chars: 200_000,
            max_candidates: 25,
            max_scroll_rounds: 20,
            scroll_pause: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Milliseconds
    pub base_delay: u64,
    /// Milliseconds
    pub max_delay: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: 1_000,
            max_delay: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible chat completions endpoint
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
        }
    }
}

impl ScrapeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string
    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content)?;
        let config: ScrapeConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, else the user config file if present, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `$XDG_CONFIG_HOME/pagesift/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pagesift").join("config.toml"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.browser.browser_type()?;
        self.browser.viewport_size()?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Expand environment variables in the format `${VAR}`
fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut result = content.to_string();
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| ConfigError::Invalid {
        field: "<pattern>".to_string(),
        message: e.to_string(),
    })?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value =
            std::env::var(var_name).map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
