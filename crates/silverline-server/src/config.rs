//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use silverline_assist::{AssistantConfig, KnowledgeConfig, LimitsConfig};
use silverline_types::RateLimitConfig;
use silverline_voice::{CarrierCredentials, TranscriptionConfig};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Telephony carrier account and call script settings.
    #[serde(default)]
    pub carrier: CarrierConfig,

    /// Speech-to-text settings.
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Language model settings.
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// FAQ store settings.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Message length limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Per-client token buckets.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Family pre-registration settings.
    #[serde(default)]
    pub signup: SignupConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "silverline_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Carrier account, agent numbers and voice used in call scripts.
#[derive(Clone, Deserialize)]
pub struct CarrierConfig {
    #[serde(default)]
    pub account_sid: String,

    /// Shared secret used for webhook signatures and recording downloads.
    #[serde(default)]
    pub auth_token: String,

    /// Externally visible origin, e.g. `https://support.example.com`.
    ///
    /// Signatures are computed over the URL the carrier called. When unset,
    /// the URL is rebuilt from `X-Forwarded-Proto` and `Host`.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Disables signature checks. Development only.
    #[serde(default)]
    pub skip_signature_validation: bool,

    #[serde(default = "default_human_agent_number")]
    pub human_agent_number: String,

    /// Falls back to `human_agent_number` when unset.
    #[serde(default)]
    pub signup_agent_number: Option<String>,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_voice_language")]
    pub language: String,
}

/// Family pre-registration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupConfig {
    /// Days a pending signup stays usable.
    #[serde(default = "default_signup_expiry_days")]
    pub expiry_days: u32,

    /// Seconds between expiry sweeps. `0` disables the sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "silverline.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_human_agent_number() -> String {
    "+1-800-555-0199".to_string()
}

fn default_voice() -> String {
    "Polly.Joanna-Neural".to_string()
}

fn default_voice_language() -> String {
    "en-US".to_string()
}

fn default_signup_expiry_days() -> u32 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            public_base_url: None,
            skip_signature_validation: false,
            human_agent_number: default_human_agent_number(),
            signup_agent_number: None,
            voice: default_voice(),
            language: default_voice_language(),
        }
    }
}

impl fmt::Debug for CarrierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("public_base_url", &self.public_base_url)
            .field("skip_signature_validation", &self.skip_signature_validation)
            .field("human_agent_number", &self.human_agent_number)
            .field("signup_agent_number", &self.signup_agent_number)
            .field("voice", &self.voice)
            .field("language", &self.language)
            .finish()
    }
}

impl CarrierConfig {
    pub fn credentials(&self) -> CarrierCredentials {
        CarrierCredentials::new(&self.account_sid, &self.auth_token)
    }
}

impl Default for SignupConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_signup_expiry_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// `carrier.public_base_url` is not an absolute http(s) URL.
    #[error("invalid carrier.public_base_url {value:?}: {reason}")]
    InvalidBaseUrl { value: String, reason: String },
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_string(name).map(|v| v == "true" || v == "1")
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SILVERLINE_HOST`, `SILVERLINE_PORT`, `SILVERLINE_DB_PATH`
/// - `SILVERLINE_LOG_LEVEL`, `SILVERLINE_LOG_JSON` ("true" or "1")
/// - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `PUBLIC_BASE_URL`
/// - `SKIP_TWILIO_VALIDATION` ("true" or "1")
/// - `HUMAN_AGENT_NUMBER`, `SIGNUP_AGENT_NUMBER`
/// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `ANTHROPIC_MODEL`
/// - `KNOWLEDGE_SEED_PATH`, `PARAMETER_FILE`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    validate_base_url(&config.carrier)?;
    Ok(config)
}

/// Signatures cover the exact URL the carrier called, so the base must be
/// a bare scheme and host.
fn validate_base_url(carrier: &CarrierConfig) -> Result<(), ConfigError> {
    let Some(value) = carrier.public_base_url.as_deref() else {
        return Ok(());
    };
    let invalid = |reason: &str| ConfigError::InvalidBaseUrl {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let parsed = url::Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid("must not carry a query or fragment"));
    }
    Ok(())
}

fn apply_env_overrides(config: &mut Config) {
    if let Some(parsed) = env_string("SILVERLINE_HOST").and_then(|h| h.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = env_string("SILVERLINE_PORT").and_then(|p| p.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(db_path) = env_string("SILVERLINE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = env_string("SILVERLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env_flag("SILVERLINE_LOG_JSON") {
        config.logging.json = json;
    }

    if let Some(sid) = env_string("TWILIO_ACCOUNT_SID") {
        config.carrier.account_sid = sid;
    }
    if let Some(token) = env_string("TWILIO_AUTH_TOKEN") {
        config.carrier.auth_token = token;
    }
    if let Some(url) = env_string("PUBLIC_BASE_URL") {
        config.carrier.public_base_url = Some(url);
    }
    if let Some(skip) = env_flag("SKIP_TWILIO_VALIDATION") {
        config.carrier.skip_signature_validation = skip;
    }
    if let Some(number) = env_string("HUMAN_AGENT_NUMBER") {
        config.carrier.human_agent_number = number;
    }
    if let Some(number) = env_string("SIGNUP_AGENT_NUMBER") {
        config.carrier.signup_agent_number = Some(number);
    }

    if let Some(key) = env_string("OPENAI_API_KEY") {
        config.transcription.openai_api_key = Some(key);
    }
    if let Some(key) = env_string("ANTHROPIC_API_KEY") {
        config.assistant.anthropic_api_key = Some(key);
    }
    if let Some(model) = env_string("ANTHROPIC_MODEL") {
        config.assistant.model = model;
    }
    if let Some(path) = env_string("KNOWLEDGE_SEED_PATH") {
        config.knowledge.seed_path = Some(path.into());
    }
    if let Some(path) = env_string("PARAMETER_FILE") {
        config.limits.parameter_file = Some(path.into());
    }
}
