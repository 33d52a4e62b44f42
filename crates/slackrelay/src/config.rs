use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::MAX_MIN_INTERVAL;

/// Environment variable holding the Slack bot token.
pub const SLACK_BOT_TOKEN_ENV: &str = "SLACK_BOT_TOKEN";

/// Environment variable holding the completion service API key.
pub const COMPLETION_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Upper bound for `delay.max_seconds`.
pub const MAX_DELAY_SECONDS: u64 = 60 * 60;

/// Upper bound for `completion.throttle_backoff_ms`.
pub const MAX_THROTTLE_BACKOFF_MS: u64 = 10 * 60 * 1000;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub delay: DelayConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let config: Self = serde_saphyr::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the relay misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delay.min_seconds == 0 {
            return Err(ConfigError::Invalid(
                "delay.min_seconds must be greater than zero".to_string(),
            ));
        }
        if self.delay.max_seconds > MAX_DELAY_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "delay.max_seconds must not exceed {MAX_DELAY_SECONDS}"
            )));
        }
        if self.delay.min_seconds > self.delay.max_seconds {
            return Err(ConfigError::Invalid(format!(
                "delay.min_seconds ({}) must not exceed delay.max_seconds ({})",
                self.delay.min_seconds, self.delay.max_seconds
            )));
        }
        if self.completion.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "completion.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.completion.min_interval() > MAX_MIN_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "completion.min_interval_seconds must not exceed {}",
                MAX_MIN_INTERVAL.as_secs()
            )));
        }
        if self.completion.throttle_backoff_ms > MAX_THROTTLE_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "completion.throttle_backoff_ms must not exceed {MAX_THROTTLE_BACKOFF_MS}"
            )));
        }
        if self.completion.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "completion.model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// How long to wait for in-flight relays on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    150
}

// ============================================================================
// SlackConfig
// ============================================================================

/// How the `url_verification` challenge is echoed back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeFormat {
    /// `{"challenge": "<token>"}`
    #[default]
    Json,
    /// The bare token as `text/plain`.
    Plain,
}

#[derive(Debug, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    /// Bot user ID (e.g. `U0123ABCD`). Resolved with `auth.test` when unset.
    #[serde(default)]
    pub bot_user_id: Option<String>,
    /// Only reply to messages that mention the bot.
    #[serde(default = "default_true")]
    pub mention_gating: bool,
    /// Start a thread under the triggering message when it is not already in one.
    #[serde(default = "default_true")]
    pub thread_replies: bool,
    #[serde(default)]
    pub challenge_response: ChallengeFormat,
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
    #[serde(default = "default_slack_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_seconds: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: default_slack_api_base(),
            bot_user_id: None,
            mention_gating: true,
            thread_replies: true,
            challenge_response: ChallengeFormat::default(),
            fallback_text: default_fallback_text(),
            request_timeout_seconds: default_slack_timeout(),
            dedup_ttl_seconds: default_dedup_ttl(),
        }
    }
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_true() -> bool {
    true
}

fn default_fallback_text() -> String {
    "There was an issue processing your request.".to_string()
}

fn default_slack_timeout() -> u64 {
    10
}

fn default_dedup_ttl() -> u64 {
    600
}

// ============================================================================
// CompletionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Minimum spacing between the starts of two completion calls.
    #[serde(default = "default_min_interval")]
    pub min_interval_seconds: u64,
    #[serde(default = "default_throttle_backoff")]
    pub throttle_backoff_ms: u64,
    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            max_tokens: None,
            temperature: None,
            min_interval_seconds: default_min_interval(),
            throttle_backoff_ms: default_throttle_backoff(),
            max_throttle_retries: default_max_throttle_retries(),
            timeout_seconds: default_completion_timeout(),
        }
    }
}

impl CompletionConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_seconds)
    }

    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant responding to Slack messages. \
     Keep responses concise and professional."
        .to_string()
}

fn default_min_interval() -> u64 {
    10
}

fn default_throttle_backoff() -> u64 {
    1000
}

fn default_max_throttle_retries() -> u32 {
    5
}

fn default_completion_timeout() -> u64 {
    10
}

// ============================================================================
// DelayConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_delay_min")]
    pub min_seconds: u64,
    #[serde(default = "default_delay_max")]
    pub max_seconds: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_seconds: default_delay_min(),
            max_seconds: default_delay_max(),
        }
    }
}

fn default_delay_min() -> u64 {
    30
}

fn default_delay_max() -> u64 {
    120
}

// ============================================================================
// Secrets
// ============================================================================

/// Credentials read from the process environment, never from the config file.
#[derive(Clone)]
pub struct Secrets {
    pub slack_bot_token: String,
    pub completion_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let slack_bot_token = lookup(SLACK_BOT_TOKEN_ENV)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingEnv(SLACK_BOT_TOKEN_ENV))?;
        let completion_api_key = lookup(COMPLETION_API_KEY_ENV).filter(|v| !v.is_empty());
        Ok(Self {
            slack_bot_token,
            completion_api_key,
        })
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("slack_bot_token", &"<redacted>")
            .field(
                "completion_api_key",
                &self.completion_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.request_timeout_seconds, 10);
        assert!(config.slack.mention_gating);
        assert!(config.slack.thread_replies);
        assert_eq!(config.slack.challenge_response, ChallengeFormat::Json);
        assert_eq!(
            config.slack.fallback_text,
            "There was an issue processing your request."
        );
        assert_eq!(config.completion.min_interval(), Duration::from_secs(10));
        assert_eq!(config.completion.throttle_backoff(), Duration::from_secs(1));
        assert_eq!(config.completion.max_throttle_retries, 5);
        assert_eq!(config.completion.timeout(), Duration::from_secs(10));
        assert_eq!(config.delay.min_seconds, 30);
        assert_eq!(config.delay.max_seconds, 120);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing_path).await.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.completion.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 8081
slack:
  bot_user_id: "UBOT"
  mention_gating: false
  thread_replies: false
  challenge_response: plain
completion:
  model: "gpt-3.5-turbo"
  max_tokens: 50
  min_interval_seconds: 2
  max_throttle_retries: 3
delay:
  min_seconds: 5
  max_seconds: 15
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.slack.bot_user_id.as_deref(), Some("UBOT"));
        assert!(!config.slack.mention_gating);
        assert!(!config.slack.thread_replies);
        assert_eq!(config.slack.challenge_response, ChallengeFormat::Plain);
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert_eq!(config.completion.max_tokens, Some(50));
        assert_eq!(config.completion.min_interval(), Duration::from_secs(2));
        assert_eq!(config.completion.max_throttle_retries, 3);
        assert_eq!(config.delay.min_seconds, 5);
        assert_eq!(config.delay.max_seconds, 15);
    }

    #[tokio::test]
    async fn test_load_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
completion:
  timeout_seconds: 20
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.completion.timeout(), Duration::from_secs(20));
        assert_eq!(config.completion.min_interval_seconds, 10); // default
        assert_eq!(config.server.port, 3000); // default
        assert!(config.slack.mention_gating); // default
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_inverted_delay_bounds() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
delay:
  min_seconds: 60
  max_seconds: 10
"#
        )
        .unwrap();

        let err = Config::load(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.completion.timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_delay() {
        let mut config = Config::default();
        config.delay.min_seconds = 0;
        config.delay.max_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_intervals() {
        let mut config = Config::default();
        config.completion.min_interval_seconds = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.completion.throttle_backoff_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.delay.max_seconds = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.completion.min_interval_seconds = MAX_MIN_INTERVAL.as_secs();
        config.delay.max_seconds = MAX_DELAY_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secrets_from_lookup() {
        let env: HashMap<&str, &str> = [
            (SLACK_BOT_TOKEN_ENV, "xoxb-test"),
            (COMPLETION_API_KEY_ENV, "sk-test"),
        ]
        .into_iter()
        .collect();

        let secrets = Secrets::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(secrets.slack_bot_token, "xoxb-test");
        assert_eq!(secrets.completion_api_key.as_deref(), Some("sk-test"));
        assert!(!format!("{secrets:?}").contains("xoxb-test"));
    }

    #[test]
    fn test_secrets_require_slack_token() {
        let err = Secrets::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(SLACK_BOT_TOKEN_ENV)));
        assert!(err.to_string().contains(SLACK_BOT_TOKEN_ENV));
    }

    #[test]
    fn test_config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
    }
}
