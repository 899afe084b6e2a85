//! Configuration for the relay server.

use anyhow::{Context, Result};
use relay_core::SenderPolicy;
use secrecy::SecretString;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// One-time code configuration
    #[serde(default)]
    pub otp: OtpConfig,

    /// Code delivery configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Relay behavior
    #[serde(default)]
    pub relay: RelayConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    /// How long an issued code stays valid
    #[serde(default = "default_otp_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Write codes to the log. Development builds only.
    Log,
    /// POST codes to an SMS gateway.
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_mode")]
    pub mode: DeliveryMode,

    /// SMS gateway endpoint (webhook mode)
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Bearer token for the SMS gateway
    #[serde(default)]
    pub webhook_token: Option<SecretString>,

    /// Include the code in `/verify` responses (requires the `dev-otp` feature)
    #[serde(default, deserialize_with = "bool_from_env")]
    pub echo_code: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Trust model for the `sender` field of relayed messages
    #[serde(default)]
    pub sender_policy: SenderPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute on the verification endpoints
    #[serde(default = "default_global_rpm", deserialize_with = "u32_from_env")]
    pub global_per_minute: u32,

    /// Code requests per phone number per hour
    #[serde(default = "default_per_phone_rph", deserialize_with = "u32_from_env")]
    pub per_phone_per_hour: u32,

    /// How often idle per-phone limiter entries are pruned
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl: default_otp_ttl(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: default_delivery_mode(),
            webhook_url: None,
            webhook_token: None,
            echo_code: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
            per_phone_per_hour: default_per_phone_rph(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    5000
}

fn default_otp_ttl() -> Duration {
    relay_core::DEFAULT_CODE_TTL
}

fn default_delivery_mode() -> DeliveryMode {
    DeliveryMode::Webhook
}

fn default_global_rpm() -> u32 {
    60
}

fn default_per_phone_rph() -> u32 {
    5
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

// Environment values arrive as strings because parsing is disabled to keep
// phone-like values intact.
fn bool_from_env<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => Ok(b),
        Raw::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean: {}",
                other
            ))),
        },
    }
}

fn u32_from_env<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Address the server binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid SERVER__LISTEN_ADDR {:?}", self.server.listen_addr))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Reject combinations that cannot run in this build.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        match self.delivery.mode {
            DeliveryMode::Log if !cfg!(feature = "dev-otp") => {
                anyhow::bail!("delivery mode `log` requires the `dev-otp` feature")
            }
            DeliveryMode::Webhook if self.delivery.webhook_url.is_none() => {
                anyhow::bail!("DELIVERY__WEBHOOK_URL is required in webhook mode")
            }
            _ => {}
        }

        if self.delivery.echo_code && !cfg!(feature = "dev-otp") {
            anyhow::bail!("DELIVERY__ECHO_CODE requires the `dev-otp` feature");
        }

        if self.rate_limit.global_per_minute == 0 || self.rate_limit.per_phone_per_hour == 0 {
            anyhow::bail!("rate limits must be greater than zero");
        }

        if self.rate_limit.cleanup_interval.is_zero() {
            anyhow::bail!("RATE_LIMIT__CLEANUP_INTERVAL must be greater than zero");
        }

        Ok(())
    }
}
