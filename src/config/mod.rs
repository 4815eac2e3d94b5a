use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub upstream: UpstreamSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64, // milliseconds
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    /// JSON 文件: 配置方案 (profiles)
    pub profile_file: String,
    /// JSON 文件: token 使用统计
    pub usage_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    /// 默认上游地址 (未匹配到 profile 时使用)
    pub base_url: String,
    /// anthropic-version 默认值
    pub api_version: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String, // "json" or "pretty"
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.request_timeout", 600000)? // 10 minutes
            .set_default("storage.profile_file", "data/config.json")?
            .set_default("storage.usage_file", "data/token-stats.json")?
            .set_default("upstream.base_url", "https://api.anthropic.com")?
            .set_default("upstream.api_version", "2023-06-01")?
            .set_default("upstream.timeout_seconds", 600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load config file if exists
            .add_source(File::with_name("config/config").required(false))
            .add_source(File::with_name(&format!("config/config.{}", run_mode)).required(false));

        // Manually override with environment variables (workaround for case sensitivity issues)
        // Server settings
        if let Ok(val) = env::var("CPR_SERVER__HOST") {
            builder = builder.set_override("server.host", val)?;
        }
        if let Ok(val) = env::var("CPR_SERVER__PORT") {
            builder = builder.set_override("server.port", val)?;
        }
        if let Ok(val) = env::var("CPR_SERVER__REQUEST_TIMEOUT") {
            builder = builder.set_override("server.request_timeout", val)?;
        }

        // Storage settings
        if let Ok(val) = env::var("CPR_STORAGE__PROFILE_FILE") {
            builder = builder.set_override("storage.profile_file", val)?;
        }
        if let Ok(val) = env::var("CPR_STORAGE__USAGE_FILE") {
            builder = builder.set_override("storage.usage_file", val)?;
        }

        // Upstream settings
        if let Ok(val) = env::var("CPR_UPSTREAM__BASE_URL") {
            builder = builder.set_override("upstream.base_url", val)?;
        }
        if let Ok(val) = env::var("CPR_UPSTREAM__API_VERSION") {
            builder = builder.set_override("upstream.api_version", val)?;
        }
        if let Ok(val) = env::var("CPR_UPSTREAM__TIMEOUT_SECONDS") {
            builder = builder.set_override("upstream.timeout_seconds", val)?;
        }

        // Logging settings
        if let Ok(val) = env::var("CPR_LOGGING__LEVEL") {
            builder = builder.set_override("logging.level", val)?;
        }
        if let Ok(val) = env::var("CPR_LOGGING__FORMAT") {
            builder = builder.set_override("logging.format", val)?;
        }

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.storage.profile_file.is_empty() {
            return Err("storage.profile_file must not be empty".to_string());
        }
        if self.storage.usage_file.is_empty() {
            return Err("storage.usage_file must not be empty".to_string());
        }

        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                self.upstream.base_url
            ));
        }

        // Validate logging level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid logging level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        // Validate logging format
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid logging format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        Ok(())
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_settings_defaults() {
        let settings = Settings::new().expect("Failed to load settings");

        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.upstream.base_url, "https://api.anthropic.com");
        assert_eq!(settings.upstream.api_version, "2023-06-01");
        assert_eq!(settings.storage.profile_file, "data/config.json");
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("CPR_SERVER__PORT", "4000");
        env::set_var("CPR_UPSTREAM__BASE_URL", "http://localhost:9999");

        let settings = Settings::new().expect("Failed to load settings");

        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.upstream.base_url, "http://localhost:9999");

        env::remove_var("CPR_SERVER__PORT");
        env::remove_var("CPR_UPSTREAM__BASE_URL");
    }

    #[test]
    fn test_validation_rejects_bad_level() {
        let settings = Settings {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 3000,
                request_timeout: 600000,
            },
            storage: StorageSettings {
                profile_file: "data/config.json".to_string(),
                usage_file: "data/token-stats.json".to_string(),
            },
            upstream: UpstreamSettings {
                base_url: "https://api.anthropic.com".to_string(),
                api_version: "2023-06-01".to_string(),
                timeout_seconds: 600,
            },
            logging: LoggingSettings {
                level: "verbose".to_string(),
                format: "pretty".to_string(),
            },
        };

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_non_http_upstream() {
        let settings = Settings {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 3000,
                request_timeout: 600000,
            },
            storage: StorageSettings {
                profile_file: "data/config.json".to_string(),
                usage_file: "data/token-stats.json".to_string(),
            },
            upstream: UpstreamSettings {
                base_url: "ftp://api.anthropic.com".to_string(),
                api_version: "2023-06-01".to_string(),
                timeout_seconds: 600,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        assert!(settings.validate().is_err());
    }
}
