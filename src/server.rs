/// Server setup and initialization
///
/// Wires together all components: storage, registry, execution engine, cron
/// scheduler, and HTTP routes. Provides the main application factory function
/// for creating the Axum app.

use crate::{
    api::{
        runs::create_run_routes,
        workflows::{create_workflow_routes, AppState},
    },
    config::Config,
    runtime::{actions::BuiltinActionDispatcher, engine::ExecutionEngine, scheduler::CronSchedulerService},
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes and middleware
///
/// Initializes all components and wires them together into a complete application.
/// This includes the database connection, workflow registry, execution engine,
/// cron scheduler, and HTTP routes.
pub async fn create_app(config: Config) -> Result<Router> {
    // Ensure the data directory exists
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    // Open the workflow database
    let db_path = Path::new(&config.database.data_dir).join("gearway.db");
    tracing::info!("🗄️ Opening workflow database: {}", db_path.display());
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    // Initialize workflow storage
    tracing::info!("📋 Initializing workflow storage");
    let workflow_storage = WorkflowStorage::new(pool);
    workflow_storage.init_schema().await?;

    // Initialize workflow registry and load existing workflows
    tracing::info!("📊 Initializing workflow registry");
    let workflow_registry = Arc::new(WorkflowRegistry::new(workflow_storage.clone()));

    tracing::info!("📥 Loading existing workflows from storage");
    workflow_registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    // Initialize execution components
    tracing::info!("⚙️ Initializing action dispatcher");
    let dispatcher = Arc::new(BuiltinActionDispatcher::new());

    tracing::info!("🚀 Initializing execution engine");
    let execution_engine = Arc::new(ExecutionEngine::new(dispatcher));

    // Initialize cron scheduler service
    tracing::info!("⏰ Initializing cron scheduler service");
    let cron_scheduler = Arc::new(
        CronSchedulerService::new(
            Arc::clone(&workflow_registry),
            Arc::clone(&execution_engine),
            workflow_storage.clone(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize cron scheduler: {}", e))?,
    );

    // Start the cron scheduler in the background
    tracing::info!("🚀 Starting cron scheduler");
    let scheduler_clone = Arc::clone(&cron_scheduler);
    tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start().await {
            tracing::error!("❌ Failed to start cron scheduler: {}", e);
        }
    });

    // Create application state
    tracing::info!("🏗️ Creating application state");
    let app_state = AppState {
        storage: workflow_storage,
        registry: workflow_registry,
        scheduler: cron_scheduler,
        engine: execution_engine,
    };

    // Create the main application router
    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Workflow management API routes
        .merge(create_workflow_routes().with_state(app_state.clone()))
        // Run invocation routes
        .merge(create_run_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app = create_app(config).await?;

    tracing::info!("🌍 Gearway listening on http://{}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Simple health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
