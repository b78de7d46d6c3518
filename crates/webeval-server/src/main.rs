//! webeval-server: MCP server binary
//!
//! Brings up the dashboard relay and the browser session manager, then
//! serves the evaluation tools to an MCP client over stdio.
//!
//! Usage:
//!   webeval-server           - Serve the MCP tools on stdio
//!   webeval-server --help    - Show help
//!   webeval-server --version - Show version

use std::sync::Arc;

use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::EnvFilter;

use webeval_browser::SessionManager;
use webeval_core::Config;
use webeval_mcp::EvalService;
use webeval_relay::Relay;

/// Run mode
enum RunMode {
    /// Serve MCP on stdio
    Serve,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_args() {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("webeval-server {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Serve => {}
    }

    // stdout carries the MCP transport, all logging goes to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting webeval-server...");
    tracing::info!(
        "Screencast mode: {:?}, agent step limit: {}",
        config.screencast.mode,
        config.agent.max_steps
    );

    // Start the dashboard relay; evaluation still works without it
    let relay = Relay::new(config.relay.clone());
    match relay.ensure_started().await {
        Ok(()) => tracing::info!("Dashboard relay listening on {}", relay.addr()),
        Err(e) => tracing::warn!(
            "Dashboard relay unavailable, continuing without live view: {}",
            e
        ),
    }

    let session = Arc::new(SessionManager::new(config, relay.clone()));
    let service = EvalService::new(Arc::clone(&session));

    let running = service.serve(stdio()).await?;
    tracing::info!("MCP service ready on stdio");
    tracing::info!("Press Ctrl+C to exit");

    tokio::select! {
        _ = running.waiting() => {
            tracing::info!("MCP transport closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
        }
    }

    // Tear down the browser and the relay before exiting
    session.close().await;
    relay.shutdown().await;
    tracing::info!("webeval-server stopped");

    Ok(())
}

/// Parse command line arguments
fn parse_args() -> RunMode {
    let args: Vec<String> = std::env::args().collect();

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            _ => {}
        }
    }

    RunMode::Serve
}

/// Print help message
fn print_help() {
    println!("webeval-server - browser-driven UX evaluation over MCP");
    println!();
    println!("Usage:");
    println!("  webeval-server           Serve the MCP tools on stdio");
    println!("  webeval-server --help    Show this help message");
    println!("  webeval-server --version Show version");
    println!();
    println!("Environment Variables:");
    println!("  WEBEVAL_CONFIG       Path to a TOML config file");
    println!("  RELAY_HOST           Dashboard relay host (default: 127.0.0.1)");
    println!("  RELAY_PORT           Dashboard relay port (default: 5009)");
    println!("  RELAY_STATIC_DIR     Directory of dashboard assets to serve");
    println!("  BROWSER_HEADLESS     Run the browser headless (default: true)");
    println!("  CHROME_BIN           Chrome/Chromium executable to launch");
    println!("  STATE_FILE           Where saved cookies/storage live");
    println!("  SCREENCAST_MODE      frame_push or polling (default: frame_push)");
    println!("  AGENT_MAX_STEPS      Step limit per evaluation (default: 25)");
    println!("  LLM_MODEL            Model for the agent backend");
    println!("  LLM_API_KEY          API key for the agent backend");
    println!("  RUST_LOG             Log filter (default: info)");
}
