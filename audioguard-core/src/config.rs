use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Upper bound for `session.ttl_secs` (one year).
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Environment variable prefix for overrides, e.g. `AUDIOGUARD__DETECTION__CLIENT_SECRET`.
pub const ENV_PREFIX: &str = "AUDIOGUARD";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    /// `production` enables quota enforcement and secure cookies.
    pub environment: String,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty URL runs the server against the in-memory result store.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_bytes: usize,
    pub allowed_mime_types: Vec<String>,
    pub quota_ceiling: u32,
    /// Multipart field carrying the audio file.
    pub form_field: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 100 * 1024 * 1024,
            allowed_mime_types: vec![
                "audio/mpeg".to_string(),
                "audio/wav".to_string(),
                "audio/ogg".to_string(),
            ],
            quota_ceiling: 5,
            form_field: "audio".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConfig {
    pub identity_url: String,
    pub storage_url: String,
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            identity_url: "https://api.ircamamplify.io".to_string(),
            storage_url: "https://storage.ircamamplify.io".to_string(),
            api_url: "https://api.ircamamplify.io".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            poll_interval_ms: 5000,
            max_poll_attempts: 120,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "audioguard_sid".to_string(),
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl SessionConfig {
    /// Session lifetime, never above `MAX_SESSION_TTL_SECS`.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(MAX_SESSION_TTL_SECS) as i64)
    }
}

impl AppConfig {
    /// Load from a TOML file, then layer `AUDIOGUARD__SECTION__KEY` env overrides on top.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.quota_ceiling == 0 {
            return Err(ConfigError::Message(
                "upload.quota_ceiling must be greater than zero".to_string(),
            ));
        }
        if self.upload.allowed_mime_types.is_empty() {
            return Err(ConfigError::Message(
                "upload.allowed_mime_types must not be empty".to_string(),
            ));
        }
        if self.detection.poll_interval_ms == 0 || self.detection.max_poll_attempts == 0 {
            return Err(ConfigError::Message(
                "detection.poll_interval_ms and detection.max_poll_attempts must be positive"
                    .to_string(),
            ));
        }
        if self.session.ttl_secs == 0 || self.session.ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(ConfigError::Message(format!(
                "session.ttl_secs must be between 1 and {}",
                MAX_SESSION_TTL_SECS
            )));
        }
        if self.service.is_production()
            && (self.detection.client_id.is_empty() || self.detection.client_secret.is_empty())
        {
            return Err(ConfigError::Message(
                "detection.client_id and detection.client_secret are required in production"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("upload.allowed_mime_types")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.service.is_production());
        assert_eq!(config.upload.quota_ceiling, 5);
        assert_eq!(config.upload.form_field, "audio");
        assert_eq!(config.detection.poll_interval_ms, 5000);
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [service]
            environment = "production"
            log_level = "debug"

            [upload]
            max_file_size_bytes = 10485760
            allowed_mime_types = ["audio/wav"]
            quota_ceiling = 3
            form_field = "audio"

            [detection]
            identity_url = "http://localhost:9000"
            storage_url = "http://localhost:9001"
            api_url = "http://localhost:9002"
            client_id = "id"
            client_secret = "secret"
            poll_interval_ms = 10
            max_poll_attempts = 4
            request_timeout_secs = 5
            "#,
        )
        .expect("config should parse");

        assert!(config.service.is_production());
        assert_eq!(config.upload.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.upload.allowed_mime_types, vec!["audio/wav".to_string()]);
        assert_eq!(config.upload.quota_ceiling, 3);
        assert_eq!(config.detection.max_poll_attempts, 4);
        // Untouched sections keep their defaults
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.session.cookie_name, "audioguard_sid");
    }

    #[test]
    fn test_production_requires_credentials() {
        let result = AppConfig::from_toml_str(
            r#"
            [service]
            environment = "production"
            log_level = "info"
            "#,
        );
        assert!(result.is_err(), "Missing credentials must fail in production");
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.upload.quota_ceiling = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_ttl_bounds() {
        let mut config = AppConfig::default();
        config.session.ttl_secs = 0;
        assert!(config.validate().is_err(), "zero TTL would expire every session at once");

        config.session.ttl_secs = 10_000_000_000_000;
        assert!(config.validate().is_err());

        config.session.ttl_secs = MAX_SESSION_TTL_SECS;
        assert!(config.validate().is_ok());
        assert_eq!(config.session.ttl().num_days(), 365);
    }

    #[test]
    fn test_prod_alias_is_production() {
        let service = ServiceConfig {
            environment: "PROD".to_string(),
            log_level: "info".to_string(),
        };
        assert!(service.is_production());
    }
}
