//! Binary crate for the `weather-chat` server.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Serving the chat page and the streaming chat API
//! - Interactive configuration

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_server=info,chat_core=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
