use crate::{
    error::{WeatherError, truncate_body},
    model::{GeocodeResult, TemperatureUnit, WeatherObservation},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

pub mod forecast;
pub mod geocoding;

pub use forecast::OpenMeteoForecast;
pub use geocoding::OpenMeteoGeocoder;

/// Resolves a free-text place name to coordinates.
#[async_trait]
pub trait LocationResolver: Send + Sync + Debug {
    /// `Ok(None)` when the lookup matched nothing.
    async fn resolve(&self, location: &str) -> Result<Option<GeocodeResult>, WeatherError>;
}

/// Fetches current conditions for a coordinate pair.
#[async_trait]
pub trait WeatherFetcher: Send + Sync + Debug {
    async fn current(
        &self,
        latitude: f64,
        longitude: f64,
        unit: TemperatureUnit,
    ) -> Result<WeatherObservation, WeatherError>;
}

/// Send a prepared request and decode its JSON body, mapping transport,
/// status and parse failures onto [`WeatherError`].
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, WeatherError> {
    let res = request.send().await?;

    let status = res.status();
    let body = res.text().await?;

    if !status.is_success() {
        return Err(WeatherError::Status {
            service,
            status,
            body: truncate_body(&body),
        });
    }

    serde_json::from_str(&body).map_err(|source| WeatherError::Parse { service, source })
}
