use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) redis: RedisSettings,
    pub(super) ai: AiSettings,
    pub(super) retry: RetrySettings,
    pub(super) checking: CheckingSettings,
    pub(super) ocr: OcrSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: u16,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub request_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub min_wait_seconds: u64,
    pub max_wait_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CheckingSettings {
    pub cache_ttl_seconds: u64,
    pub cache_prefix_bytes: usize,
    pub history_limit: usize,
    pub history_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub languages: String,
    pub tessdata_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl RedisSettings {
    pub fn redis_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

impl AiSettings {
    pub fn is_configured(&self) -> bool {
        !self.openai_api_key.is_empty()
    }
}
