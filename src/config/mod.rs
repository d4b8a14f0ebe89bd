//! Configuration module for the voice relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::realtime::build_model_url;
use crate::core::relay::{Credential, ReconnectPolicy, RelaySettings};

mod env;
mod yaml;

pub use yaml::YamlConfig;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("OPENAI_API_KEY is required")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
///
/// Contains everything needed to run the relay:
/// - Server settings (host, port, public URL)
/// - Model provider endpoint and API key
/// - Relay tuning (reconnect policy, close timeout)
/// - Function handler upstreams
/// - CORS settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used for the call-setup document
    pub public_url: String,

    // Model provider
    pub openai_api_key: Option<String>,
    pub model_url: String,
    pub model: String,

    // Relay tuning
    /// Maximum model reconnection attempts per outage
    /// Default: 3
    pub reconnect_max_attempts: u32,
    /// Delay before the first model reconnection attempt
    /// Default: 1000
    pub reconnect_base_delay_ms: u64,
    /// Bound on graceful peer closes
    /// Default: 5000
    pub close_timeout_ms: u64,

    // Function handlers
    pub weather_api_url: String,
    /// Bound on each outbound request made by a function handler
    /// Default: 10000
    pub function_timeout_ms: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: String,
}

/// Implement Drop to zeroize secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// The .env file is loaded by the binary at startup, so its values are
    /// visible here as environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = env::load_from_env()?;
        config.apply_yaml(yaml_config);
        config.validate()?;

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(public_url) = server.public_url {
                self.public_url = public_url;
            }
        }

        if let Some(providers) = yaml.providers {
            if let Some(key) = providers.openai_api_key {
                self.openai_api_key = Some(key);
            }
            if let Some(url) = providers.openai_realtime_url {
                self.model_url = url;
            }
            if let Some(model) = providers.openai_realtime_model {
                self.model = model;
            }
        }

        if let Some(relay) = yaml.relay {
            if let Some(max_attempts) = relay.reconnect_max_attempts {
                self.reconnect_max_attempts = max_attempts;
            }
            if let Some(delay) = relay.reconnect_base_delay_ms {
                self.reconnect_base_delay_ms = delay;
            }
            if let Some(timeout) = relay.close_timeout_ms {
                self.close_timeout_ms = timeout;
            }
        }

        if let Some(functions) = yaml.functions {
            if let Some(url) = functions.weather_api_url {
                self.weather_api_url = url;
            }
            if let Some(timeout) = functions.timeout_ms {
                self.function_timeout_ms = timeout;
            }
        }

        if let Some(security) = yaml.security
            && let Some(origins) = security.cors_allowed_origins
        {
            self.cors_allowed_origins = origins;
        }
    }

    /// Validate the merged configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .openai_api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            return Err(ConfigError::MissingApiKey);
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if self.close_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "close_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.function_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "function_timeout_ms must be non-zero".to_string(),
            ));
        }
        build_model_url(&self.model_url, &self.model)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Credential handed to every telephony leg
    pub fn credential(&self) -> Credential {
        Credential::new(self.openai_api_key.clone().unwrap_or_default())
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_max_attempts,
                base_delay_ms: self.reconnect_base_delay_ms,
            },
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }

    /// Parsed CORS origins; `None` means any origin
    pub fn cors_origins(&self) -> Option<Vec<String>> {
        let origins = self.cors_allowed_origins.trim();
        if origins == "*" || origins.is_empty() {
            return None;
        }
        Some(
            origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    /// Helper function to create a test ServerConfig with defaults
    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "localhost".to_string(),
            port: 8081,
            public_url: "https://relay.example.com".to_string(),
            openai_api_key: Some("sk-test".to_string()),
            model_url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            reconnect_max_attempts: 3,
            reconnect_base_delay_ms: 1000,
            close_timeout_ms: 5000,
            weather_api_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            function_timeout_ms: 10_000,
            cors_allowed_origins: "*".to_string(),
        }
    }

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("HOST");
            env::remove_var("PORT");
            env::remove_var("PUBLIC_URL");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_REALTIME_URL");
            env::remove_var("OPENAI_REALTIME_MODEL");
            env::remove_var("MODEL_RECONNECT_MAX_ATTEMPTS");
            env::remove_var("MODEL_RECONNECT_BASE_DELAY_MS");
            env::remove_var("PEER_CLOSE_TIMEOUT_MS");
            env::remove_var("WEATHER_API_URL");
            env::remove_var("FUNCTION_TIMEOUT_MS");
            env::remove_var("CORS_ALLOWED_ORIGINS");
        }
    }

    #[test]
    fn test_address() {
        assert_eq!(test_config().address(), "localhost:8081");
    }

    #[test]
    fn test_validate_requires_api_key() {
        let mut config = test_config();
        config.openai_api_key = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));

        config.openai_api_key = Some("   ".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = test_config();
        config.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = test_config();
        config.close_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = test_config();
        config.function_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_model_url() {
        let mut config = test_config();
        config.model_url = "https://api.openai.com/v1/realtime".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_relay_settings() {
        let mut config = test_config();
        config.reconnect_max_attempts = 5;
        config.reconnect_base_delay_ms = 250;
        config.close_timeout_ms = 1500;

        let settings = config.relay_settings();
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.reconnect.base_delay_ms, 250);
        assert_eq!(settings.close_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_cors_origins() {
        let mut config = test_config();
        assert_eq!(config.cors_origins(), None);

        config.cors_allowed_origins = "https://a.example.com, https://b.example.com".to_string();
        assert_eq!(
            config.cors_origins(),
            Some(vec![
                "https://a.example.com".to_string(),
                "https://b.example.com".to_string()
            ])
        );
    }

    #[test]
    fn test_credential_debug_hides_key() {
        let credential = test_config().credential();
        assert_eq!(credential.expose(), "sk-test");
        assert!(!format!("{credential:?}").contains("sk-test"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
        }

        let config = ServerConfig::from_env().unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8081);
        assert_eq!(config.public_url, "");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.model_url, "wss://api.openai.com/v1/realtime");
        assert_eq!(config.model, "gpt-4o-realtime-preview-2024-12-17");
        assert_eq!(config.reconnect_max_attempts, 3);
        assert_eq!(config.reconnect_base_delay_ms, 1000);
        assert_eq!(config.close_timeout_ms, 5000);
        assert_eq!(
            config.weather_api_url,
            "https://api.open-meteo.com/v1/forecast"
        );
        assert_eq!(config.function_timeout_ms, 10_000);
        assert_eq!(config.cors_allowed_origins, "*");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_api_key() {
        cleanup_env_vars();

        let result = ServerConfig::from_env();
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_port() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PORT", "eighty");
        }

        let result = ServerConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "PORT"
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PORT", "9090");
            env::set_var("PUBLIC_URL", "https://abc.ngrok.app");
            env::set_var("MODEL_RECONNECT_MAX_ATTEMPTS", "0");
            env::set_var("PEER_CLOSE_TIMEOUT_MS", "250");
            env::set_var("FUNCTION_TIMEOUT_MS", "1500");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.public_url, "https://abc.ngrok.app");
        assert_eq!(config.reconnect_max_attempts, 0);
        assert_eq!(config.close_timeout_ms, 250);
        assert_eq!(config.function_timeout_ms, 1500);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

providers:
  openai_api_key: "sk-yaml"

relay:
  reconnect_base_delay_ms: 500
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "0.0.0.0");
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PUBLIC_URL", "https://env.example.com");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-yaml"));
        assert_eq!(config.reconnect_base_delay_ms, 500);
        // Not in YAML, so the environment value survives
        assert_eq!(config.public_url, "https://env.example.com");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_validates() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "relay:\n  close_timeout_ms: 0\n").unwrap();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
        }

        let result = ServerConfig::from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        cleanup_env_vars();
    }
}
