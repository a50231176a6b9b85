//! Configuration types.
//!
//! Everything is read from environment variables at startup. Missing
//! credentials are reported as [`ConfigError`] and are fatal in `main`.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::gigachat::{DEFAULT_API_URL, DEFAULT_AUTH_URL, DEFAULT_MODEL, DEFAULT_SCOPE};

/// Default upper bound for a single plan generation call.
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;

/// Which transport the bot talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Telegram,
    Cli,
}

impl std::str::FromStr for ChannelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "cli" => Ok(Self::Cli),
            other => Err(ConfigError::InvalidValue {
                key: "PLAN_ASSIST_CHANNEL".to_string(),
                message: format!("expected 'telegram' or 'cli', got '{other}'"),
            }),
        }
    }
}

/// GigaChat provider settings.
#[derive(Debug, Clone)]
pub struct GigaChatConfig {
    /// Base64 authorization key issued by the provider.
    pub credentials: SecretString,
    /// OAuth scope (personal, business or corporate API).
    pub scope: String,
    pub model: String,
    /// Certificate verification is off by default: the provider's chain is
    /// signed by a CA most systems don't ship.
    pub verify_ssl_certs: bool,
    pub auth_url: String,
    pub api_url: String,
}

impl GigaChatConfig {
    /// Build from `GIGACHAT_*` variables. `GIGACHAT_CREDENTIALS` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let credentials = required_var("GIGACHAT_CREDENTIALS")?;

        let verify_ssl_certs = match std::env::var("GIGACHAT_VERIFY_SSL") {
            Ok(raw) => parse_bool("GIGACHAT_VERIFY_SSL", &raw)?,
            Err(_) => false,
        };

        Ok(Self {
            credentials: SecretString::from(credentials),
            scope: std::env::var("GIGACHAT_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string()),
            model: std::env::var("GIGACHAT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            verify_ssl_certs,
            auth_url: std::env::var("GIGACHAT_AUTH_URL")
                .unwrap_or_else(|_| DEFAULT_AUTH_URL.to_string()),
            api_url: std::env::var("GIGACHAT_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
        })
    }
}

/// Telegram transport settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids; `*` admits everyone.
    pub allowed_users: Vec<String>,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = required_var("TELEGRAM_BOT_TOKEN")?;
        let allowed_users = parse_list(
            &std::env::var("TELEGRAM_ALLOWED_USERS").unwrap_or_else(|_| "*".to_string()),
        );

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            allowed_users,
        })
    }
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub channel: ChannelKind,
    /// Present only when `channel` is [`ChannelKind::Telegram`].
    pub telegram: Option<TelegramConfig>,
    pub gigachat: GigaChatConfig,
    /// Upper bound on a single generation call.
    pub generation_timeout: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let channel = match std::env::var("PLAN_ASSIST_CHANNEL") {
            Ok(raw) => raw.parse()?,
            Err(_) => ChannelKind::Telegram,
        };

        let telegram = match channel {
            ChannelKind::Telegram => Some(TelegramConfig::from_env()?),
            ChannelKind::Cli => None,
        };

        let generation_timeout_secs = match std::env::var("PLAN_ASSIST_GENERATION_TIMEOUT_SECS") {
            Ok(raw) => parse_secs("PLAN_ASSIST_GENERATION_TIMEOUT_SECS", &raw)?,
            Err(_) => DEFAULT_GENERATION_TIMEOUT_SECS,
        };

        Ok(Self {
            channel,
            telegram,
            gigachat: GigaChatConfig::from_env()?,
            generation_timeout: Duration::from_secs(generation_timeout_secs),
        })
    }
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{e}"),
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(secs)
}
