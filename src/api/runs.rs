/// Run invocation and history endpoints
///
/// Starts workflow runs from the HTTP surface and serves the persisted run
/// history. A run request may name a specific trigger node
/// (scheduled/explicit invocation) and carry a string-to-string trigger
/// context that becomes the activated triggers' result payload. Every
/// finished run is recorded to storage before the response goes out.

use crate::api::workflows::AppState;
use crate::runtime::engine::{RunResult, TracingObserver};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, Router},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Request body for run invocation
///
/// Both fields are optional: an empty body activates every manual trigger
/// with an empty context.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Specific trigger node to activate; omit to activate all manual triggers
    #[serde(default)]
    pub trigger_node_id: Option<String>,
    /// Key/value context serialized onto the activated triggers
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Create run invocation and history routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/workflows/{id}/runs", get(list_runs))
}

/// Execute a workflow run
///
/// POST /api/workflows/:id/run
/// Body: { "trigger_node_id": "nightly", "context": { "user": "ada" } }
/// Returns the full run result including per-node states.
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<RunResult>, StatusCode> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    tracing::info!("📥 Run request received for workflow: {}", id);

    let compiled = match state.registry.get_workflow(&id) {
        Some(compiled) => compiled,
        None => {
            tracing::warn!("❌ Run requested for unknown workflow: {}", id);
            return Err(StatusCode::NOT_FOUND);
        }
    };

    let run_start = std::time::Instant::now();
    let result = state
        .engine
        .execute(
            &compiled.workflow,
            request.trigger_node_id.as_deref(),
            &request.context,
            Some(&TracingObserver),
        )
        .await;
    let duration_ms = run_start.elapsed().as_millis() as i64;

    // History is best effort: a storage hiccup must not mask the run result.
    if let Err(e) = state.storage.record_run(&result, duration_ms).await {
        tracing::error!("Failed to record run for workflow {}: {}", id, e);
    }

    tracing::info!(
        "📤 Run finished for workflow {}: success={} ({})",
        id,
        result.success,
        result.message
    );

    Ok(Json(result))
}

/// List recent runs of a workflow
///
/// GET /api/workflows/:id/runs
/// Returns: { "runs": [{ "id": "...", "success": true, "node_states": {...}, ... }] }
async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if state.registry.get_workflow(&id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    match state.storage.list_runs(&id, None).await {
        Ok(runs) => Ok(Json(json!({ "runs": runs }))),
        Err(e) => {
            tracing::error!("Failed to list runs for workflow {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
