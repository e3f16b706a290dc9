use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::WeatherError,
    model::{TemperatureUnit, WeatherObservation},
};

use super::{WeatherFetcher, fetch_json};

pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com";

/// Current conditions from the Open-Meteo forecast API.
#[derive(Debug, Clone)]
pub struct OpenMeteoForecast {
    base_url: String,
    http: Client,
}

impl OpenMeteoForecast {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, DEFAULT_FORECAST_URL)
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OmForecastResponse {
    #[serde(default)]
    current: Option<OmCurrent>,
}

#[derive(Debug, Default, Deserialize)]
struct OmCurrent {
    temperature_2m: Option<f64>,
    weather_code: Option<i32>,
}

#[async_trait]
impl WeatherFetcher for OpenMeteoForecast {
    async fn current(
        &self,
        latitude: f64,
        longitude: f64,
        unit: TemperatureUnit,
    ) -> Result<WeatherObservation, WeatherError> {
        let url = format!("{}/v1/forecast", self.base_url);

        let parsed: OmForecastResponse = fetch_json(
            "forecast",
            self.http.get(&url).query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", "temperature_2m,weather_code".to_string()),
                ("temperature_unit", unit.as_str().to_string()),
            ]),
        )
        .await?;

        // The API may omit either value; both fall back to zero.
        let current = parsed.current.unwrap_or_default();
        Ok(WeatherObservation {
            temperature: current.temperature_2m.unwrap_or(0.0),
            condition_code: current.weather_code.unwrap_or(0),
        })
    }
}
