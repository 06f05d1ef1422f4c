//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::assistant::session::SessionRetention;
use crate::error::ConfigError;

/// Per-request timeout of every outbound HTTP client.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default signature appended to canned replies.
pub const DEFAULT_SIGNATURE: &str = "Programming Hub Support";

/// Hosted assistant settings.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: SecretString,
    pub assistant_id: String,
    pub base_url: String,
}

/// Turn orchestration settings.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Pause between two run status checks.
    pub poll_interval: Duration,
    /// Upper bound on how long a single turn may be polled.
    pub deadline: Duration,
    /// Wait for the run to finish after submitting tool outputs.
    pub confirm_tool_submission: bool,
    /// Signature line of the canned certificate replies.
    pub signature: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(600), // runs expire server-side after 10 minutes
            confirm_tool_submission: false,
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }
}

/// Certificate service settings.
#[derive(Debug, Clone)]
pub struct CertificateConfig {
    pub api_url: String,
    pub output_dir: PathBuf,
}

/// Gmail access settings.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub token_path: PathBuf,
    pub api_base: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            token_path: PathBuf::from("token.json"),
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
        }
    }
}

/// Log file location.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub file: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file: "app.log".to_string(),
        }
    }
}

impl LogConfig {
    /// Read `LOG_DIR` / `LOG_FILE`. Never fails, so logging can start before
    /// the rest of the configuration is validated.
    pub fn from_env() -> Self {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            dir: lookup("LOG_DIR").map(PathBuf::from).unwrap_or(defaults.dir),
            file: lookup("LOG_FILE").unwrap_or(defaults.file),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub assistant: AssistantConfig,
    pub turn: TurnConfig,
    pub certificate: CertificateConfig,
    pub gmail: GmailConfig,
    pub session_retention: SessionRetention,
    pub mail_poll_interval: Duration,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let assistant = AssistantConfig {
            api_key: SecretString::from(required("OPENAI_API_KEY")?),
            assistant_id: required("ASSISTANT_ID")?,
            base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        };

        let defaults = TurnConfig::default();
        let turn = TurnConfig {
            poll_interval: parse_or(&lookup, "TURN_POLL_INTERVAL_MS", 1000u64)
                .map(Duration::from_millis)?,
            deadline: parse_or(&lookup, "TURN_DEADLINE_SECS", defaults.deadline.as_secs())
                .map(Duration::from_secs)?,
            confirm_tool_submission: parse_or(&lookup, "CONFIRM_TOOL_SUBMISSION", false)?,
            signature: lookup("REPLY_SIGNATURE").unwrap_or(defaults.signature),
        };

        let certificate = CertificateConfig {
            api_url: required("CERTIFICATE_API_URL")?,
            output_dir: lookup("CERTIFICATE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("certificates")),
        };

        let gmail_defaults = GmailConfig::default();
        let gmail = GmailConfig {
            token_path: lookup("GMAIL_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or(gmail_defaults.token_path),
            api_base: lookup("GMAIL_API_BASE").unwrap_or(gmail_defaults.api_base),
        };


        let session_retention = match lookup("SESSION_IDLE_TTL_SECS") {
            Some(raw) => SessionRetention::IdleTtl(Duration::from_secs(parse_value(
                "SESSION_IDLE_TTL_SECS",
                &raw,
            )?)),
            None => SessionRetention::ProcessLifetime,
        };

        Ok(Self {
            assistant,
            turn,
            certificate,
            gmail,
            session_retention,
            mail_poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "MAIL_POLL_INTERVAL_SECS",
                60u64,
            )?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
