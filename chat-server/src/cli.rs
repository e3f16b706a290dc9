use anyhow::Context;
use chat_core::{Config, TemperatureUnit, WeatherQuery, weather_tool_from_config};
use clap::{Parser, Subcommand};
use inquire::{Password, Text};

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-chat", version, about = "Weather chat demo")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the chat web server.
    Serve {
        /// Address to bind the server to.
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,
    },

    /// Run the weather tool once and print its report.
    Weather {
        /// Address or location name.
        location: String,

        /// "celsius" or "fahrenheit"; anything else means celsius.
        #[arg(long)]
        unit: Option<String>,
    },

    /// Store the Gemini API key and model in the config file.
    Configure,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Serve { addr } => serve(&addr).await,
            Command::Weather { location, unit } => {
                let config = Config::load()?;
                let tool = weather_tool_from_config(&config, reqwest::Client::new());
                let query = WeatherQuery::new(location, TemperatureUnit::from_lenient(unit.as_deref()));

                let report = tool.report(&query).await;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Command::Configure => configure(),
        }
    }
}

async fn serve(addr: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    if config.gemini_api_key().is_none() {
        tracing::warn!("GEMINI_API_KEY not configured; /api/chat will answer with 500");
    }
    tracing::info!(
        addr,
        model = config.model(),
        production = config.is_production(),
        "starting server"
    );

    let app = server::router(server::AppState::new(config)?);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn configure() -> anyhow::Result<()> {
    let mut config = Config::load_file()?;

    let api_key = Password::new("Gemini API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    let model = Text::new("Model:")
        .with_default(config.model())
        .prompt()
        .context("Failed to read model name")?;

    config.set_gemini(api_key.trim().to_string(), Some(model.trim().to_string()));
    config.save()?;

    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_default_addr() {
        let cli = Cli::try_parse_from(["weather-chat", "serve"]).unwrap();
        match cli.command {
            Command::Serve { addr } => assert_eq!(addr, "127.0.0.1:3000"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_weather_with_unit() {
        let cli =
            Cli::try_parse_from(["weather-chat", "weather", "Oslo", "--unit", "fahrenheit"]).unwrap();
        match cli.command {
            Command::Weather { location, unit } => {
                assert_eq!(location, "Oslo");
                assert_eq!(unit.as_deref(), Some("fahrenheit"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn weather_requires_location() {
        assert!(Cli::try_parse_from(["weather-chat", "weather"]).is_err());
    }
}
