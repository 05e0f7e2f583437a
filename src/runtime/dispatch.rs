/// Action dispatch boundary
///
/// Execute nodes hand their resolved parameters to an `ActionDispatcher`,
/// the engine's only external collaborator. The trait is async because
/// dispatch is an IO boundary (HTTP calls, shell-outs, queues); the run loop
/// suspends there and resumes for the next node.

use anyhow::Result;
use async_trait::async_trait;

/// A single resolved name/value pair passed to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionParameter {
    pub name: String,
    pub value: String,
}

/// Outcome of one action invocation.
///
/// `success: false` marks the owning Execute node as failed without aborting
/// the run; `error` carries the reason when the dispatcher can name one.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub result_text: String,
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Successful outcome with a result text.
    pub fn ok(result_text: impl Into<String>) -> Self {
        Self { success: true, result_text: result_text.into(), error: None }
    }

    /// Failed outcome with an error description.
    pub fn err(error: impl Into<String>) -> Self {
        Self { success: false, result_text: String::new(), error: Some(error.into()) }
    }
}

/// The contract every action backend must fulfil.
///
/// Implementations must be safe to share across concurrent runs; the engine
/// never serializes access to the dispatcher.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Invoke the named action with the resolved parameters.
    ///
    /// An `Err` return and an `ActionOutcome { success: false, .. }` are
    /// equivalent from the engine's point of view: both fail the node.
    async fn invoke(&self, action_type: &str, parameters: &[ActionParameter]) -> Result<ActionOutcome>;
}
