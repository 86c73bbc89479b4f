//! Application configuration structs
//!
//! Loads configuration from environment variables (and an optional `.env` file).

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: ServerConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub presence: PresenceConfig,
    pub consumer: ConsumerSettings,
    pub cors: CorsConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
    /// Identity of this gateway instance, recorded as the owner of every
    /// connection it accepts
    pub server_id: String,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
    /// Upper bound for establishing a connection at startup
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Cap of the exponential reconnect backoff
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

impl RedisConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

/// JWT configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64,
}

/// Presence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_presence_ttl")]
    pub ttl_seconds: u64,
    /// Interval advertised to clients for `presence:heartbeat`
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl PresenceConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which a socket is considered dead
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval() * 2
    }
}

/// Broker consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSettings {
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
}

impl ConsumerSettings {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

// Default value functions
fn default_app_name() -> String {
    "chat-gateway".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_server_id() -> String {
    format!("server-{}", std::process::id())
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_max_connections() -> u32 {
    16
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    2_000
}

fn default_access_token_expiry() -> i64 {
    900 // 15 minutes
}

fn default_presence_ttl() -> u64 {
    chat_core::constants::DEFAULT_PRESENCE_TTL_SECS
}

fn default_heartbeat_interval_ms() -> u64 {
    25_000
}

fn default_prefetch() -> usize {
    chat_core::constants::DEFAULT_PREFETCH
}

fn default_max_retries() -> u32 {
    chat_core::constants::DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    chat_core::constants::DEFAULT_RETRY_DELAY_MS
}

fn default_lease_ttl_ms() -> u64 {
    chat_core::constants::DEFAULT_CONSUMER_LEASE_TTL_MS
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|s| s.trim().parse().ok())
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    ///
    /// # Errors
    /// Returns an error if required variables are missing or malformed
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = lookup("GATEWAY_PORT").ok_or(ConfigError::MissingVar("GATEWAY_PORT"))?;
        let port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue("GATEWAY_PORT", port.clone()))?;

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .as_deref()
                    .and_then(Environment::parse)
                    .unwrap_or_default(),
                server_id: lookup("SERVER_ID")
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(default_server_id),
            },
            gateway: ServerConfig {
                host: lookup("GATEWAY_HOST").unwrap_or_else(default_host),
                port,
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL").ok_or(ConfigError::MissingVar("REDIS_URL"))?,
                max_connections: parsed(&lookup, "REDIS_MAX_CONNECTIONS")
                    .unwrap_or_else(default_redis_max_connections),
                connect_timeout_ms: parsed(&lookup, "REDIS_CONNECT_TIMEOUT_MS")
                    .unwrap_or_else(default_connect_timeout_ms),
                reconnect_max_delay_ms: parsed(&lookup, "REDIS_RECONNECT_MAX_DELAY_MS")
                    .unwrap_or_else(default_reconnect_max_delay_ms),
            },
            jwt: JwtConfig {
                secret: lookup("JWT_SECRET").ok_or(ConfigError::MissingVar("JWT_SECRET"))?,
                access_token_expiry: parsed(&lookup, "JWT_ACCESS_TOKEN_EXPIRY")
                    .unwrap_or_else(default_access_token_expiry),
            },
            presence: PresenceConfig {
                ttl_seconds: parsed::<u64>(&lookup, "PRESENCE_TTL_SECONDS")
                    .filter(|ttl| *ttl > 0)
                    .unwrap_or_else(default_presence_ttl),
                heartbeat_interval_ms: parsed::<u64>(&lookup, "HEARTBEAT_INTERVAL_MS")
                    .filter(|ms| *ms > 0)
                    .unwrap_or_else(default_heartbeat_interval_ms),
            },
            consumer: ConsumerSettings {
                prefetch: parsed::<usize>(&lookup, "CONSUMER_PREFETCH")
                    .filter(|n| *n > 0)
                    .unwrap_or_else(default_prefetch),
                max_retries: parsed(&lookup, "CONSUMER_MAX_RETRIES")
                    .unwrap_or_else(default_max_retries),
                retry_delay_ms: parsed(&lookup, "CONSUMER_RETRY_DELAY_MS")
                    .unwrap_or_else(default_retry_delay_ms),
                lease_ttl_ms: parsed(&lookup, "CONSUMER_LEASE_TTL_MS")
                    .filter(|ms| *ms > 0)
                    .unwrap_or_else(default_lease_ttl_ms),
            },
            cors: CorsConfig {
                allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
