/// Gearway: Hyperminimalist conditional workflow automation engine
///
/// This library provides the core workflow execution engine with conditional
/// edge gating, skip propagation, typed node interpreters, and hot-reload
/// workflow management.

// Core configuration and setup
pub mod config;

// Workflow management layer - handles workflow definitions, storage, and registry
pub mod workflow;

// Runtime execution engine - dependency graph construction, topological
// execution with edge-condition gating, and node interpretation
pub mod runtime;

// HTTP API layer - REST endpoints for workflow management and run invocation
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{
    ActionDispatcher, ActionOutcome, ActionParameter, ExecutionEngine, RunObserver, RunResult,
};
pub use server::start_server;
pub use workflow::{
    NodeExecutionState, NodeKind, ParameterValue, Workflow, WorkflowNode, WorkflowNodeConnection,
};
