use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::functions::{FunctionRegistry, build_http_client};
use crate::core::realtime::{ModelConnector, OpenAIRealtimeConnector};
use crate::core::relay::{Credential, RelayHandle, RelayOrchestrator};
use crate::errors::relay_error::{RelayError, RelayResult};

/// Application state shared by all handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub relay: RelayHandle,
    pub functions: Arc<FunctionRegistry>,
}

impl AppState {
    /// Build the state and start the relay event loop.
    pub fn new(config: ServerConfig) -> RelayResult<Arc<Self>> {
        let http_client = build_http_client(Duration::from_millis(config.function_timeout_ms))
            .map_err(|e| RelayError::InvalidConfiguration(e.to_string()))?;
        let functions = FunctionRegistry::with_builtins(http_client, &config.weather_api_url);
        let connector = OpenAIRealtimeConnector::new(&config.model_url, &config.model)?;

        info!(model_url = %connector.url(), "Model endpoint configured");

        Ok(Self::with_connector(config, functions, Arc::new(connector)))
    }

    /// Build the state around a custom model connector.
    pub fn with_connector(
        config: ServerConfig,
        functions: FunctionRegistry,
        connector: Arc<dyn ModelConnector>,
    ) -> Arc<Self> {
        let functions = Arc::new(functions);
        let (orchestrator, relay) =
            RelayOrchestrator::new(functions.clone(), connector, config.relay_settings());
        orchestrator.spawn();

        Arc::new(Self {
            config,
            relay,
            functions,
        })
    }

    pub fn credential(&self) -> Credential {
        self.config.credential()
    }
}
