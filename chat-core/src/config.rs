use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::{
    chat::gemini::{self, GeminiConfig},
    error::ChatError,
    provider::{forecast, geocoding},
};

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const MODEL_VAR: &str = "GEMINI_MODEL";
pub const APP_ENV_VAR: &str = "APP_ENV";
pub const INSECURE_TLS_VAR: &str = "DEV_INSECURE_TLS";

/// Model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GeminiSection {
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Override for tests and proxies.
    pub base_url: Option<String>,
}

/// Outbound weather API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WeatherSection {
    pub geocoding_url: Option<String>,
    pub forecast_url: Option<String>,
}

/// Top-level configuration stored on disk and overlaid by the environment.
///
/// Example TOML:
/// ```toml
/// environment = "development"
/// dev_insecure_tls = false
///
/// [gemini]
/// api_key = "..."
/// model = "gemini-2.0-flash"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// "production" or anything else.
    pub environment: Option<String>,

    /// Accept invalid TLS certificates on the model client. Ignored in production.
    #[serde(default)]
    pub dev_insecure_tls: bool,

    #[serde(default)]
    pub gemini: GeminiSection,

    #[serde(default)]
    pub weather: WeatherSection,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_file()?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load_file() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-chat", "weather-chat")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay values from an environment lookup. Environment wins over file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(API_KEY_VAR) {
            self.gemini.api_key = Some(key);
        }
        if let Some(model) = non_empty(MODEL_VAR) {
            self.gemini.model = Some(model);
        }
        if let Some(env) = non_empty(APP_ENV_VAR) {
            self.environment = Some(env);
        }
        if let Some(flag) = non_empty(INSECURE_TLS_VAR) {
            self.dev_insecure_tls = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("production"))
    }

    /// Returns the provider credential, if present and non-blank.
    pub fn gemini_api_key(&self) -> Option<&str> {
        self.gemini
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn model(&self) -> &str {
        self.gemini.model.as_deref().unwrap_or(gemini::DEFAULT_MODEL)
    }

    /// The insecure-TLS flag only takes effect outside production.
    pub fn accept_invalid_certs(&self) -> bool {
        self.dev_insecure_tls && !self.is_production()
    }

    /// Transport config for the model client. Fails when no credential is set.
    pub fn gemini_config(&self) -> Result<GeminiConfig, ChatError> {
        let api_key = self
            .gemini_api_key()
            .ok_or(ChatError::MissingCredential(API_KEY_VAR))?;

        Ok(GeminiConfig {
            api_key: api_key.to_string(),
            model: self.model().to_string(),
            base_url: self
                .gemini
                .base_url
                .clone()
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string()),
            accept_invalid_certs: self.accept_invalid_certs(),
        })
    }

    pub fn geocoding_url(&self) -> &str {
        self.weather
            .geocoding_url
            .as_deref()
            .unwrap_or(geocoding::DEFAULT_GEOCODING_URL)
    }

    pub fn forecast_url(&self) -> &str {
        self.weather
            .forecast_url
            .as_deref()
            .unwrap_or(forecast::DEFAULT_FORECAST_URL)
    }

    /// Set or replace the API key and model.
    pub fn set_gemini(&mut self, api_key: String, model: Option<String>) {
        self.gemini.api_key = Some(api_key);
        if model.is_some() {
            self.gemini.model = model;
        }
    }
}
