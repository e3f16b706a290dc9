//! Model-invocable tools and the weather lookup built on top of the
//! geocoding and forecast providers.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    conditions,
    error::WeatherError,
    model::{WeatherQuery, WeatherReport},
    provider::{LocationResolver, WeatherFetcher},
};

pub const LOCATION_NOT_FOUND: &str = "Location not found";
pub const FETCH_FAILED: &str = "Error fetching weather";

/// Name, description and JSON input schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool the model may call. Calls never fail: problems are reported back
/// to the model inside the returned value.
#[async_trait]
pub trait Tool: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    async fn call(&self, args: Value) -> Value;
}

/// Tools available to one chat, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.declaration().name, tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations sorted by name so requests are stable.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<_> = self.tools.values().map(|t| t.declaration()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub async fn call(&self, name: &str, args: Value) -> Value {
        match self.tools.get(name) {
            Some(tool) => tool.call(args).await,
            None => {
                tracing::warn!(tool = name, "model requested an unknown tool");
                json!({ "error": format!("Unknown tool '{name}'") })
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

/// How a weather lookup ended.
#[derive(Debug)]
pub enum ToolOutcome {
    Found(WeatherReport),
    NotFound { location: String },
    Failed { location: String, reason: WeatherError },
}

impl From<ToolOutcome> for WeatherReport {
    fn from(outcome: ToolOutcome) -> Self {
        match outcome {
            ToolOutcome::Found(report) => report,
            ToolOutcome::NotFound { location } => WeatherReport {
                temperature: 0.0,
                conditions: LOCATION_NOT_FOUND.to_string(),
                location,
            },
            ToolOutcome::Failed { location, .. } => WeatherReport {
                temperature: 0.0,
                conditions: FETCH_FAILED.to_string(),
                location,
            },
        }
    }
}

/// The `get_weather` tool: geocode, fetch current conditions, label them.
#[derive(Debug, Clone)]
pub struct WeatherTool {
    resolver: Arc<dyn LocationResolver>,
    fetcher: Arc<dyn WeatherFetcher>,
}

impl WeatherTool {
    pub const NAME: &'static str = "get_weather";

    pub fn new(resolver: Arc<dyn LocationResolver>, fetcher: Arc<dyn WeatherFetcher>) -> Self {
        Self { resolver, fetcher }
    }

    pub async fn lookup(&self, query: &WeatherQuery) -> ToolOutcome {
        match self.try_lookup(query).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::warn!(location = %query.location, error = %reason, "weather lookup failed");
                ToolOutcome::Failed {
                    location: query.location.clone(),
                    reason,
                }
            }
        }
    }

    /// Always returns a well-formed report.
    pub async fn report(&self, query: &WeatherQuery) -> WeatherReport {
        self.lookup(query).await.into()
    }

    async fn try_lookup(&self, query: &WeatherQuery) -> Result<ToolOutcome, WeatherError> {
        let Some(place) = self.resolver.resolve(&query.location).await? else {
            return Ok(ToolOutcome::NotFound {
                location: query.location.clone(),
            });
        };

        let obs = self
            .fetcher
            .current(place.latitude, place.longitude, query.unit)
            .await?;

        Ok(ToolOutcome::Found(WeatherReport {
            temperature: obs.temperature,
            conditions: conditions::describe(obs.condition_code).to_string(),
            location: place.label(),
        }))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: Self::NAME.to_string(),
            description: "Get the current weather for a location".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state, e.g. San Francisco, CA"
                    },
                    "unit": {
                        "type": "string",
                        "enum": ["celsius", "fahrenheit"],
                        "description": "Temperature unit, defaults to celsius"
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Value {
        let query = match serde_json::from_value::<WeatherQuery>(args) {
            Ok(q) if !q.location.trim().is_empty() => q,
            Ok(_) => return json!({ "error": "location must not be empty" }),
            Err(e) => return json!({ "error": format!("Invalid arguments: {e}") }),
        };

        tracing::info!(location = %query.location, unit = %query.unit, "weather tool called");
        let report = self.report(&query).await;

        serde_json::to_value(&report).unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }
}
