//! Function dispatch for model-initiated function calls.
//!
//! The registry is an ordered table of descriptors, each pairing a schema the
//! model can see with an async handler. Dispatch never fails: every outcome,
//! including invalid arguments, unknown names and handler panics, is encoded as
//! the string returned to the model.

pub mod weather;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

pub use weather::{WEATHER_FUNCTION_NAME, WeatherFunction};

/// Returned when the model sends arguments that are not valid JSON
pub const INVALID_ARGUMENTS_MESSAGE: &str = "Invalid JSON arguments for function call.";

/// Default bound on one outbound request made by a function handler
pub const DEFAULT_FUNCTION_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on establishing a connection to a function's upstream
const FUNCTION_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client shared by the built-in functions.
///
/// Dispatch is awaited on the relay event loop, so every request is bounded by
/// `timeout` and connecting by the smaller of `timeout` and five seconds. A
/// request that runs out of time surfaces as an upstream failure.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(FUNCTION_CONNECT_TIMEOUT))
        .build()
}

// =============================================================================
// Types
// =============================================================================

/// Function schema as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub name: String,
    pub description: String,
    /// JSON Schema for the argument object
    pub parameters: Value,
}

impl FunctionSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            schema_type: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Errors a handler may report.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("{0}")]
    Failed(String),
}

/// Async function implementation.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Run the function with parsed arguments and return its JSON-encoded output.
    async fn call(&self, arguments: Value) -> Result<String, FunctionError>;
}

/// Schema plus handler.
#[derive(Clone)]
pub struct FunctionDescriptor {
    pub schema: FunctionSchema,
    pub handler: Arc<dyn FunctionHandler>,
}

impl FunctionDescriptor {
    pub fn new(schema: FunctionSchema, handler: impl FunctionHandler + 'static) -> Self {
        Self {
            schema,
            handler: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered function table. Lookup returns the first descriptor with a
/// matching name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    descriptors: Vec<FunctionDescriptor>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in functions.
    pub fn with_builtins(http_client: reqwest::Client, weather_api_url: &str) -> Self {
        let mut registry = Self::new();
        registry.register(WeatherFunction::new(http_client, weather_api_url).descriptor());
        registry
    }

    pub fn register(&mut self, descriptor: FunctionDescriptor) -> &mut Self {
        debug!(function = %descriptor.schema.name, "Registered function");
        self.descriptors.push(descriptor);
        self
    }

    pub fn find(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.descriptors.iter().find(|d| d.schema.name == name)
    }

    pub fn schemas(&self) -> Vec<FunctionSchema> {
        self.descriptors.iter().map(|d| d.schema.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Run the named function with JSON-encoded arguments.
    ///
    /// Arguments are parsed before the name is looked up, so invalid JSON is
    /// reported even for unknown functions.
    pub async fn dispatch(&self, name: &str, raw_arguments: &str) -> String {
        let arguments: Value = match serde_json::from_str(raw_arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(function = %name, "Invalid function arguments: {}", e);
                return error_output(INVALID_ARGUMENTS_MESSAGE);
            }
        };

        let Some(descriptor) = self.find(name) else {
            warn!(function = %name, "No handler registered");
            return error_output(&format!("No handler found for function: {name}"));
        };

        debug!(function = %name, "Dispatching function call");

        match AssertUnwindSafe(descriptor.handler.call(arguments))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(function = %name, "Function failed: {}", e);
                error_output(&format!("Error running function {name}: {e}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(function = %name, "Function panicked: {}", message);
                error_output(&format!("Error running function {name}: {message}"))
            }
        }
    }
}

fn error_output(message: &str) -> String {
    json!({ "error": message }).to_string()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
