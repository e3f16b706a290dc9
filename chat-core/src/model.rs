use serde::{Deserialize, Deserializer, Serialize};

/// Temperature unit preference for a weather lookup.
///
/// Parsing is lenient: only the exact string `"fahrenheit"` selects
/// Fahrenheit, everything else falls back to Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }

    pub fn from_lenient(value: Option<&str>) -> Self {
        match value {
            Some("fahrenheit") => TemperatureUnit::Fahrenheit,
            _ => TemperatureUnit::Celsius,
        }
    }
}

impl std::fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TemperatureUnit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(TemperatureUnit::from_lenient(raw.as_ref().and_then(|v| v.as_str())))
    }
}

/// Arguments of one weather tool invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherQuery {
    pub location: String,
    #[serde(default)]
    pub unit: TemperatureUnit,
}

impl WeatherQuery {
    pub fn new(location: impl Into<String>, unit: TemperatureUnit) -> Self {
        Self { location: location.into(), unit }
    }
}

/// First match of a geocoding lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub latitude: f64,
    pub longitude: f64,
    pub canonical_name: String,
    pub country: String,
}

impl GeocodeResult {
    /// Label used in reports, e.g. "San Francisco, US".
    pub fn label(&self) -> String {
        format!("{}, {}", self.canonical_name, self.country)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherObservation {
    pub temperature: f64,
    pub condition_code: i32,
}

/// Result handed back to the model after a weather tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature: f64,
    pub conditions: String,
    pub location: String,
}
