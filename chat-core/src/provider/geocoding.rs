use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{error::WeatherError, model::GeocodeResult};

use super::{LocationResolver, fetch_json};

pub const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com";

/// Forward geocoding through the Open-Meteo search API. No API key required.
#[derive(Debug, Clone)]
pub struct OpenMeteoGeocoder {
    base_url: String,
    http: Client,
}

impl OpenMeteoGeocoder {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, DEFAULT_GEOCODING_URL)
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OmSearchResponse {
    #[serde(default)]
    results: Option<Vec<OmPlace>>,
}

#[derive(Debug, Deserialize)]
struct OmPlace {
    latitude: f64,
    longitude: f64,
    name: String,
    country_code: Option<String>,
    country: Option<String>,
}

impl From<OmPlace> for GeocodeResult {
    fn from(place: OmPlace) -> Self {
        GeocodeResult {
            latitude: place.latitude,
            longitude: place.longitude,
            canonical_name: place.name,
            country: place.country_code.or(place.country).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl LocationResolver for OpenMeteoGeocoder {
    async fn resolve(&self, location: &str) -> Result<Option<GeocodeResult>, WeatherError> {
        let url = format!("{}/v1/search", self.base_url);

        let parsed: OmSearchResponse = fetch_json(
            "geocoding",
            self.http.get(&url).query(&[
                ("name", location),
                ("count", "1"),
                ("language", "en"),
                ("format", "json"),
            ]),
        )
        .await?;

        let place = parsed.results.and_then(|r| r.into_iter().next());
        tracing::debug!(location, found = place.is_some(), "geocoding lookup finished");

        Ok(place.map(GeocodeResult::from))
    }
}
