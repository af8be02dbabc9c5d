mod parsing;
mod settings;
mod types;

pub use types::{
    AiSettings, CheckingSettings, ConfigError, Environment, OcrSettings, RedisSettings,
    RetrySettings, RuntimeSettings, Settings, TelemetrySettings,
};
