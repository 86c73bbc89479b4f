//! Configuration structs

mod app_config;

pub use app_config::{
    AppConfig, AppSettings, ConfigError, ConsumerSettings, CorsConfig, Environment, JwtConfig,
    PresenceConfig, RedisConfig, ServerConfig,
};
