//! Configuration for tickler
//!
//! Settings come from a TOML file, then environment variables override
//! individual fields. Secrets (bot token, API key) normally arrive through
//! the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, CoreError, Result};
use crate::scheduler::{DeliveryPolicy, SchedulerConfig};

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tickler")
                .join("reminders.db"),
        }
    }
}

/// Telegram Bot API settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
}

/// OpenAI-compatible chat completion endpoint used for intent parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Deadline for a single parse or transcription call
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 15,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files; stderr only when unset
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub debug: bool,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicklerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// IANA zone for users who never set one
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_timezone() -> String {
    tickler_db::DEFAULT_TIMEZONE.to_string()
}

impl Default for TicklerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            telegram: TelegramConfig::default(),
            llm: LlmConfig::default(),
            default_timezone: default_timezone(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Standard config file locations, most specific first
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("tickler.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("tickler").join("config.toml"));
    }
    paths
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<TicklerConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "readable TOML file".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    toml::from_str(&content).map_err(|e| CoreError::ConfigurationError {
        config_path: path.display().to_string(),
        field: "content".to_string(),
        expected: "valid TOML configuration".to_string(),
        cause: ConfigError::TomlParse(e.to_string()),
    })
}

/// Load configuration from standard locations, or defaults if none exist
pub async fn load_config_from_standard_locations() -> Result<TicklerConfig> {
    for path in config_paths() {
        if path.exists() {
            debug!("Loading config from {}", path.display());
            return load_config(&path).await;
        }
    }
    Ok(TicklerConfig::default())
}

fn parse_env_secs(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|e| {
        CoreError::invalid_config("environment", key, "a whole number of seconds", e.to_string())
    })
}

fn parse_env_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl TicklerConfig {
    /// Load from `path` (or the standard locations), apply environment
    /// overrides, and validate.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path).await?,
            None => load_config_from_standard_locations().await?,
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = var("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Some(path) = var("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(secs) = var("REMINDER_CHECK_INTERVAL") {
            self.scheduler.one_shot_interval_secs =
                parse_env_secs("REMINDER_CHECK_INTERVAL", &secs)?;
        }
        if let Some(secs) = var("RECURRING_CHECK_INTERVAL") {
            self.scheduler.recurring_interval_secs =
                parse_env_secs("RECURRING_CHECK_INTERVAL", &secs)?;
        }
        if let Some(secs) = var("API_TIMEOUT") {
            self.llm.timeout_secs = parse_env_secs("API_TIMEOUT", &secs)?;
        }
        if let Some(policy) = var("DELIVERY_POLICY") {
            self.scheduler.delivery_policy = policy.parse::<DeliveryPolicy>().map_err(|e| {
                CoreError::invalid_config(
                    "environment",
                    "DELIVERY_POLICY",
                    "at_most_once or at_least_once",
                    e,
                )
            })?;
        }
        if let Some(dir) = var("LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(dir));
        }
        if let Some(debug) = var("DEBUG") {
            self.logging.debug = parse_env_bool(&debug);
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.default_zone()?;
        if self.llm.timeout_secs == 0 {
            return Err(CoreError::invalid_config(
                "config",
                "llm.timeout_secs",
                "a positive number of seconds",
                "timeout must not be zero",
            ));
        }
        Ok(())
    }

    /// The parsed default timezone.
    pub fn default_zone(&self) -> Result<Tz> {
        self.default_timezone.parse::<Tz>().map_err(|_| {
            CoreError::invalid_config(
                "config",
                "default_timezone",
                "an IANA zone name such as Europe/Moscow",
                format!("unknown timezone {:?}", self.default_timezone),
            )
        })
    }

    /// Bot token, or a configuration error naming the variable to set.
    pub fn require_telegram_token(&self) -> Result<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .ok_or_else(|| CoreError::ConfigurationError {
                config_path: "environment".to_string(),
                field: "telegram.bot_token".to_string(),
                expected: "TELEGRAM_BOT_TOKEN to be set".to_string(),
                cause: ConfigError::MissingField("TELEGRAM_BOT_TOKEN".to_string()),
            })
    }

    /// API key for the intent parser, or a configuration error.
    pub fn require_llm_key(&self) -> Result<&str> {
        self.llm
            .api_key
            .as_deref()
            .ok_or_else(|| CoreError::ConfigurationError {
                config_path: "environment".to_string(),
                field: "llm.api_key".to_string(),
                expected: "OPENAI_API_KEY to be set".to_string(),
                cause: ConfigError::MissingField("OPENAI_API_KEY".to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = TicklerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_timezone, "Europe/Moscow");
        assert_eq!(config.scheduler.one_shot_interval(), Duration::from_secs(10));
        assert_eq!(config.llm.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = TicklerConfig::default();
        config
            .apply_env(env(&[
                ("TELEGRAM_BOT_TOKEN", "123:abc"),
                ("OPENAI_API_KEY", "sk-test"),
                ("DATABASE_PATH", "/tmp/r.db"),
                ("REMINDER_CHECK_INTERVAL", "5"),
                ("API_TIMEOUT", "30"),
                ("DELIVERY_POLICY", "at_least_once"),
                ("DEBUG", "true"),
            ]))
            .unwrap();

        assert_eq!(config.require_telegram_token().unwrap(), "123:abc");
        assert_eq!(config.require_llm_key().unwrap(), "sk-test");
        assert_eq!(config.database.path, PathBuf::from("/tmp/r.db"));
        assert_eq!(config.scheduler.one_shot_interval_secs, 5);
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.scheduler.delivery_policy, DeliveryPolicy::AtLeastOnce);
        assert!(config.logging.debug);
    }

    #[test]
    fn bad_env_number_is_a_config_error() {
        let mut config = TicklerConfig::default();
        let err = config
            .apply_env(env(&[("REMINDER_CHECK_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError { .. }));
    }

    #[test]
    fn missing_secrets_are_reported() {
        let config = TicklerConfig::default();
        assert!(config.require_telegram_token().is_err());
        assert!(config.require_llm_key().is_err());
    }

    #[test]
    fn slow_recurring_poll_is_rejected() {
        let mut config = TicklerConfig::default();
        config.scheduler.recurring_interval_secs = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_default_zone_is_rejected() {
        let config = TicklerConfig {
            default_timezone: "Europe/Atlantis".to_string(),
            ..TicklerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn loads_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_timezone = "Asia/Tokyo"

[database]
path = "/var/lib/tickler/reminders.db"

[scheduler]
recurring_interval_secs = 30
"#
        )
        .unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.default_timezone, "Asia/Tokyo");
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/tickler/reminders.db")
        );
        assert_eq!(config.scheduler.recurring_interval_secs, 30);
        assert_eq!(config.scheduler.one_shot_interval_secs, 10);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn unreadable_file_is_a_config_error() {
        let err = load_config(Path::new("/definitely/not/here.toml"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConfigurationError {
                cause: ConfigError::Io(_),
                ..
            }
        ));
    }
}
