use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8081
///   public_url: "https://relay.example.com"
///
/// providers:
///   openai_api_key: "sk-..."
///   openai_realtime_url: "wss://api.openai.com/v1/realtime"
///   openai_realtime_model: "gpt-4o-realtime-preview-2024-12-17"
///
/// relay:
///   reconnect_max_attempts: 3
///   reconnect_base_delay_ms: 1000
///   close_timeout_ms: 5000
///
/// functions:
///   weather_api_url: "https://api.open-meteo.com/v1/forecast"
///   timeout_ms: 10000
///
/// security:
///   cors_allowed_origins: "*"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<ProvidersYaml>,
    pub relay: Option<RelayYaml>,
    pub functions: Option<FunctionsYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_url: Option<String>,
}

/// Model provider configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub openai_api_key: Option<String>,
    pub openai_realtime_url: Option<String>,
    pub openai_realtime_model: Option<String>,
}

/// Relay tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub reconnect_max_attempts: Option<u32>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub close_timeout_ms: Option<u64>,
}

/// Function handler configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FunctionsYaml {
    pub weather_api_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
  public_url: "https://relay.example.com"

providers:
  openai_api_key: "sk-yaml"
  openai_realtime_url: "wss://realtime.example.com/v1/realtime"
  openai_realtime_model: "gpt-4o-mini-realtime-preview"

relay:
  reconnect_max_attempts: 5
  reconnect_base_delay_ms: 250
  close_timeout_ms: 2000

functions:
  weather_api_url: "http://localhost:8080/forecast"
  timeout_ms: 3000

security:
  cors_allowed_origins: "https://dashboard.example.com"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(9000));
        assert_eq!(
            server.public_url.as_deref(),
            Some("https://relay.example.com")
        );

        let providers = config.providers.unwrap();
        assert_eq!(providers.openai_api_key.as_deref(), Some("sk-yaml"));
        assert_eq!(
            providers.openai_realtime_model.as_deref(),
            Some("gpt-4o-mini-realtime-preview")
        );

        let relay = config.relay.unwrap();
        assert_eq!(relay.reconnect_max_attempts, Some(5));
        assert_eq!(relay.reconnect_base_delay_ms, Some(250));
        assert_eq!(relay.close_timeout_ms, Some(2000));

        let functions = config.functions.unwrap();
        assert_eq!(
            functions.weather_api_url.as_deref(),
            Some("http://localhost:8080/forecast")
        );
        assert_eq!(functions.timeout_ms, Some(3000));
        assert_eq!(
            config.security.unwrap().cors_allowed_origins.as_deref(),
            Some("https://dashboard.example.com")
        );
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
server:
  port: 8082
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.port, Some(8082));
        assert!(server.host.is_none());
        assert!(config.providers.is_none());
        assert!(config.relay.is_none());
    }

    #[test]
    fn test_yaml_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "relay:\n  close_timeout_ms: 1500\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(config.relay.unwrap().close_timeout_ms, Some(1500));
    }

    #[test]
    fn test_yaml_config_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = YamlConfig::from_file(&dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_yaml_config_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "server: [not, a, map").unwrap();

        let result = YamlConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }
}
