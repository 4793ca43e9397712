use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub db: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Environment label reported by the healthcheck (development|staging|production).
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_addr")]
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
}

impl RedisConfig {
    /// Connection URL in the form `redis://[:password@]addr/db`.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

/// Redis stream settings shared by the API (enqueue) and the worker
/// (consumer group and DLQ loops).
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_key")]
    pub key: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// How long a consumer-group read blocks waiting for entries, in seconds.
    #[serde(default = "default_blocking_seconds")]
    pub blocking_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_dlq_key")]
    pub dlq_key: String,
}

impl StreamConfig {
    pub fn blocking_duration(&self) -> Duration {
        Duration::from_secs(self.blocking_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    #[serde(default = "default_limiter_enabled")]
    pub enabled: bool,
    /// Sustained requests per second per client IP.
    #[serde(default = "default_limiter_rps")]
    pub rps: u32,
    /// Maximum burst per client IP.
    #[serde(default = "default_limiter_burst")]
    pub burst: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_env() -> String {
    "development".to_string()
}

fn default_max_connections() -> u32 {
    25
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_redis_addr() -> String {
    "localhost:6379".to_string()
}

fn default_stream_key() -> String {
    "messages_stream".to_string()
}

fn default_consumer_group() -> String {
    "message_processors".to_string()
}

fn default_consumer_name() -> String {
    "message_processor_1".to_string()
}

fn default_blocking_seconds() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_dlq_key() -> String {
    "messages_dlq".to_string()
}

fn default_limiter_enabled() -> bool {
    true
}

fn default_limiter_rps() -> u32 {
    2
}

fn default_limiter_burst() -> u32 {
    4
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 4000)?
            .set_default("server.env", run_mode.as_str())?
            .set_default("db.dsn", env::var("IM_DB_DSN").unwrap_or_default())?
            .set_default("redis.addr", "localhost:6379")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER__PORT, DB__DSN, REDIS__ADDR, STREAM__KEY, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            env: default_env(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            password: String::new(),
            db: 0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            key: default_stream_key(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            blocking_seconds: default_blocking_seconds(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            batch_size: default_batch_size(),
            dlq_key: default_dlq_key(),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_limiter_enabled(),
            rps: default_limiter_rps(),
            burst: default_limiter_burst(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 4000);
        assert_eq!(server.env, "development");

        let stream = StreamConfig::default();
        assert_eq!(stream.key, "messages_stream");
        assert_eq!(stream.consumer_group, "message_processors");
        assert_eq!(stream.consumer_name, "message_processor_1");
        assert_eq!(stream.blocking_duration(), Duration::from_secs(5));
        assert_eq!(stream.retry_delay(), Duration::from_millis(1000));
        assert_eq!(stream.batch_size, 100);
        assert_eq!(stream.dlq_key, "messages_dlq");
    }

    #[test]
    fn test_limiter_defaults() {
        let limiter = LimiterConfig::default();
        assert!(limiter.enabled);
        assert_eq!(limiter.rps, 2);
        assert_eq!(limiter.burst, 4);
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://localhost:6379/0");

        redis.password = "hunter2".to_string();
        redis.db = 3;
        assert_eq!(redis.url(), "redis://:hunter2@localhost:6379/3");
    }
}
