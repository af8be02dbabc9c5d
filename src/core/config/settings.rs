use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_f64, parse_u16, parse_u32,
    parse_u64, parse_usize,
};
use super::types::{
    AiSettings, CheckingSettings, ConfigError, OcrSettings, RedisSettings, RetrySettings,
    RuntimeSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("PHOTO_CHECK_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("PHOTO_CHECK_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let openai_api_key = env_or_default("OPENAI_API_KEY", "");
        let openai_base_url = env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let text_model = env_or_default("AI_TEXT_MODEL", "gpt-4o-mini");
        let vision_model = env_or_default("AI_VISION_MODEL", "gpt-4o");
        let max_tokens = parse_u32("AI_MAX_TOKENS", env_or_default("AI_MAX_TOKENS", "1500"))?;
        let temperature = parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0.3"))?;
        let request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "60"))?;

        let max_attempts =
            parse_u32("AI_RETRY_ATTEMPTS", env_or_default("AI_RETRY_ATTEMPTS", "3"))?;
        let min_wait_seconds = parse_u64(
            "AI_RETRY_MIN_WAIT_SECONDS",
            env_or_default("AI_RETRY_MIN_WAIT_SECONDS", "4"),
        )?;
        let max_wait_seconds = parse_u64(
            "AI_RETRY_MAX_WAIT_SECONDS",
            env_or_default("AI_RETRY_MAX_WAIT_SECONDS", "10"),
        )?;

        let cache_ttl_seconds = parse_u64(
            "CHECK_CACHE_TTL_SECONDS",
            env_or_default("CHECK_CACHE_TTL_SECONDS", "3600"),
        )?;
        let cache_prefix_bytes = parse_usize(
            "CHECK_CACHE_PREFIX_BYTES",
            env_or_default("CHECK_CACHE_PREFIX_BYTES", "1024"),
        )?;
        let history_limit = parse_usize(
            "PLAGIARISM_HISTORY_LIMIT",
            env_or_default("PLAGIARISM_HISTORY_LIMIT", "10"),
        )?;
        let history_capacity = parse_usize(
            "PLAGIARISM_HISTORY_CAPACITY",
            env_or_default("PLAGIARISM_HISTORY_CAPACITY", "50"),
        )?;

        let languages = env_or_default("OCR_LANGUAGES", "rus+eng");
        let tessdata_path = env_optional("TESSDATA_PREFIX");

        let log_level = env_or_default("PHOTO_CHECK_LOG_LEVEL", "info");
        let json =
            env_optional("PHOTO_CHECK_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            ai: AiSettings {
                openai_api_key,
                openai_base_url,
                text_model,
                vision_model,
                max_tokens,
                temperature,
                request_timeout,
            },
            retry: RetrySettings { max_attempts, min_wait_seconds, max_wait_seconds },
            checking: CheckingSettings {
                cache_ttl_seconds,
                cache_prefix_bytes,
                history_limit,
                history_capacity,
            },
            ocr: OcrSettings { languages, tessdata_path },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub fn retry(&self) -> &RetrySettings {
        &self.retry
    }

    pub fn checking(&self) -> &CheckingSettings {
        &self.checking
    }

    pub fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "AI_RETRY_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.retry.min_wait_seconds > self.retry.max_wait_seconds {
            return Err(ConfigError::InvalidValue {
                field: "AI_RETRY_MIN_WAIT_SECONDS",
                value: self.retry.min_wait_seconds.to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "AI_TEMPERATURE",
                value: self.ai.temperature.to_string(),
            });
        }

        if self.ai.request_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "AI_REQUEST_TIMEOUT",
                value: "0".to_string(),
            });
        }

        if self.checking.cache_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "CHECK_CACHE_TTL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.checking.history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PLAGIARISM_HISTORY_LIMIT",
                value: "0".to_string(),
            });
        }

        if self.checking.history_capacity < self.checking.history_limit {
            return Err(ConfigError::InvalidValue {
                field: "PLAGIARISM_HISTORY_CAPACITY",
                value: self.checking.history_capacity.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.ai.openai_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;
    use crate::core::config::ConfigError;
    use crate::test_support;

    #[test]
    fn load_uses_defaults() {
        let _guard = test_support::env_lock();
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.retry().max_attempts, 3);
        assert_eq!(settings.retry().min_wait_seconds, 4);
        assert_eq!(settings.retry().max_wait_seconds, 10);
        assert_eq!(settings.checking().cache_ttl_seconds, 3600);
        assert_eq!(settings.checking().history_limit, 10);
        assert!(!settings.ai().is_configured());
        assert_eq!(settings.redis().redis_url(), "redis://127.0.0.1:6379/1");
    }

    #[test]
    fn load_rejects_inverted_backoff_bounds() {
        let _guard = test_support::env_lock();
        test_support::set_test_env();
        std::env::set_var("AI_RETRY_MIN_WAIT_SECONDS", "30");

        let result = Settings::load();
        std::env::remove_var("AI_RETRY_MIN_WAIT_SECONDS");

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "AI_RETRY_MIN_WAIT_SECONDS", .. })
        ));
    }

    #[test]
    fn strict_mode_requires_api_key() {
        let _guard = test_support::env_lock();
        test_support::set_test_env();
        std::env::set_var("PHOTO_CHECK_STRICT_CONFIG", "1");

        let result = Settings::load();
        std::env::set_var("PHOTO_CHECK_STRICT_CONFIG", "0");

        assert!(matches!(result, Err(ConfigError::MissingSecret("OPENAI_API_KEY"))));
    }
}
