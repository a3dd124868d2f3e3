use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use relay_server::config::{generate_config_template, Cli, Config};
use relay_server::server;
use relay_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle --generate-config: print template and exit
    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load(&cli).context("invalid configuration")?;

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("relay_server=info,tower_http=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!(
        name_policy = ?config.name_policy,
        "Relay server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState::new(&config);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    server::serve(listener, state.clone(), server::shutdown_signal()).await?;

    if !config.drain_timeout().is_zero() {
        server::drain(&state, config.drain_timeout()).await;
    }

    Ok(())
}
