//! Core library for the weather chat demo.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Geocoding and forecast providers behind small traits
//! - The `get_weather` tool and its always-well-formed report
//! - A streaming Gemini client and the tool-calling chat loop
//!
//! It is used by `weather-chat`, but can also be reused by other binaries or services.

pub mod chat;
pub mod conditions;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod tool;

pub use config::Config;
pub use error::{ChatError, WeatherError};
pub use model::{GeocodeResult, TemperatureUnit, WeatherObservation, WeatherQuery, WeatherReport};
pub use provider::{LocationResolver, OpenMeteoForecast, OpenMeteoGeocoder, WeatherFetcher};
pub use tool::{Tool, ToolOutcome, ToolRegistry, WeatherTool};

use std::sync::Arc;

/// Weather tool wired to the Open-Meteo endpoints named in `config`.
pub fn weather_tool_from_config(config: &Config, http: reqwest::Client) -> WeatherTool {
    WeatherTool::new(
        Arc::new(OpenMeteoGeocoder::with_base_url(http.clone(), config.geocoding_url())),
        Arc::new(OpenMeteoForecast::with_base_url(http, config.forecast_url())),
    )
}
