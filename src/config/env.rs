use std::env;
use std::fmt::Display;
use std::str::FromStr;

use super::{ConfigError, ServerConfig};
use crate::core::functions::DEFAULT_FUNCTION_TIMEOUT_MS;
use crate::core::functions::weather::DEFAULT_WEATHER_API_URL;
use crate::core::realtime::{DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL};

pub(super) const DEFAULT_HOST: &str = "0.0.0.0";
pub(super) const DEFAULT_PORT: u16 = 8081;
pub(super) const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 3;
pub(super) const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;
pub(super) const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5000;
pub(super) const DEFAULT_CORS_ALLOWED_ORIGINS: &str = "*";

/// Non-empty value of an environment variable
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env_var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name: name.to_string(),
                message: e.to_string(),
            }),
        None => Ok(default),
    }
}

/// Build configuration from environment variables, falling back to defaults.
///
/// No validation happens here; a missing API key is left as `None`.
pub(super) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    Ok(ServerConfig {
        host: env_var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env_parse("PORT", DEFAULT_PORT)?,
        public_url: env_var("PUBLIC_URL").unwrap_or_default(),
        openai_api_key: env_var("OPENAI_API_KEY"),
        model_url: env_var("OPENAI_REALTIME_URL")
            .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string()),
        model: env_var("OPENAI_REALTIME_MODEL")
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
        reconnect_max_attempts: env_parse(
            "MODEL_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?,
        reconnect_base_delay_ms: env_parse(
            "MODEL_RECONNECT_BASE_DELAY_MS",
            DEFAULT_RECONNECT_BASE_DELAY_MS,
        )?,
        close_timeout_ms: env_parse("PEER_CLOSE_TIMEOUT_MS", DEFAULT_CLOSE_TIMEOUT_MS)?,
        weather_api_url: env_var("WEATHER_API_URL")
            .unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string()),
        function_timeout_ms: env_parse("FUNCTION_TIMEOUT_MS", DEFAULT_FUNCTION_TIMEOUT_MS)?,
        cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ALLOWED_ORIGINS.to_string()),
    })
}
