/// HTTP API Layer
///
/// This module provides the REST API endpoints for workflow management
/// and run invocation. It handles:
/// - Workflow CRUD operations
/// - Run triggering with optional trigger selection and context
/// - Execution response handling

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Run invocation endpoints
pub mod runs;

// Re-export router builders
pub use runs::create_run_routes;
pub use workflows::create_workflow_routes;
