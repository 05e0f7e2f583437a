/// Gearway: Hyperminimalist conditional workflow automation engine
///
/// Main entry point for the Gearway server. Initializes configuration and starts
/// the HTTP server with workflow management and execution capabilities.

use gearway::{config::Config, server::start_server};

/// Application entry point
///
/// Initializes the server with default configuration and starts listening for requests.
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Run invocation at /api/workflows/{id}/run
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt::init();

    // Load configuration (defaults to 0.0.0.0:3006 and a SQLite database under ./data)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
