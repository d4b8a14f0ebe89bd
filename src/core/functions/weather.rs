//! Current temperature lookup by coordinates.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{FunctionDescriptor, FunctionError, FunctionHandler, FunctionSchema};

pub const WEATHER_FUNCTION_NAME: &str = "get_weather_from_coords";

/// Forecast endpoint used when none is configured
pub const DEFAULT_WEATHER_API_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Deserialize)]
struct WeatherArguments {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    #[serde(default)]
    temperature_2m: Option<f64>,
}

/// Fetches the current temperature from a forecast API.
pub struct WeatherFunction {
    client: reqwest::Client,
    api_url: String,
}

impl WeatherFunction {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    pub fn schema() -> FunctionSchema {
        FunctionSchema::new(
            WEATHER_FUNCTION_NAME,
            "Get the current weather",
            json!({
                "type": "object",
                "properties": {
                    "latitude": { "type": "number" },
                    "longitude": { "type": "number" }
                },
                "required": ["latitude", "longitude"]
            }),
        )
    }

    pub fn descriptor(self) -> FunctionDescriptor {
        FunctionDescriptor::new(Self::schema(), self)
    }

    async fn current_temperature(&self, args: &WeatherArguments) -> Result<Option<f64>, reqwest::Error> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("latitude", args.latitude.to_string()),
                ("longitude", args.longitude.to_string()),
                ("current", "temperature_2m,wind_speed_10m".to_string()),
                (
                    "hourly",
                    "temperature_2m,relative_humidity_2m,wind_speed_10m".to_string(),
                ),
            ])
            .send()
            .await?
            .error_for_status()?;

        let forecast: ForecastResponse = response.json().await?;
        Ok(forecast.current.and_then(|c| c.temperature_2m))
    }
}

#[async_trait]
impl FunctionHandler for WeatherFunction {
    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: WeatherArguments = serde_json::from_value(arguments)
            .map_err(|e| FunctionError::InvalidArguments(e.to_string()))?;

        debug!(
            latitude = args.latitude,
            longitude = args.longitude,
            "Fetching current temperature"
        );

        match self.current_temperature(&args).await {
            Ok(temperature) => Ok(json!({ "temp": temperature }).to_string()),
            Err(e) => {
                warn!("Weather lookup failed: {}", e);
                Ok(json!({ "success": false, "error": e.to_string() }).to_string())
            }
        }
    }
}
