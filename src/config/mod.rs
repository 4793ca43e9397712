mod settings;

pub use settings::{
    DatabaseConfig, LimiterConfig, RedisConfig, ServerConfig, Settings, StreamConfig,
};
