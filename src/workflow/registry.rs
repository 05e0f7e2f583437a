/// Hot-reload workflow registry using ArcSwap
///
/// Provides lock-free, atomic updates to the in-memory workflow registry.
/// Each workflow update swaps the entire registry pointer, so concurrent
/// runs keep walking the definition they started with while new invocations
/// pick up the fresh one.

use crate::workflow::{storage::WorkflowStorage, types::Workflow};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Lock-free workflow registry for hot-reload capabilities
///
/// Uses ArcSwap to provide atomic pointer swapping for the workflow map.
/// The registry is the single source of truth for active workflows in memory.
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Thread-safe atomic pointer to the workflow map
    /// Key: workflow_id, Value: compiled workflow definition
    workflows: ArcSwap<HashMap<String, CompiledWorkflow>>,

    /// Reference to persistent storage for reload operations
    storage: WorkflowStorage,
}

/// Compiled workflow with execution metadata
///
/// Extends the base Workflow with the trigger ids the run entry points need,
/// extracted once at compile time instead of on every invocation.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    /// Base workflow definition
    pub workflow: Workflow,

    /// Ids of every trigger node, in declaration order
    pub trigger_node_ids: Vec<String>,
}

impl WorkflowRegistry {
    /// Create new registry instance with storage backend
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Initialize registry by loading all workflows from storage
    ///
    /// Called during application startup to populate the in-memory registry.
    /// Workflows that fail compilation are logged and left out rather than
    /// blocking the rest of the catalog.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored_workflows = self.storage.load_all_workflows().await?;

        let mut compiled_workflows = HashMap::new();
        for (id, workflow) in stored_workflows {
            match compile_workflow(workflow) {
                Ok(compiled) => {
                    compiled_workflows.insert(id, compiled);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Skipping workflow '{}' during registry init: {}", id, e);
                }
            }
        }

        self.workflows.store(Arc::new(compiled_workflows));

        tracing::info!(
            "Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Hot-reload a single workflow
    ///
    /// Updates or adds a workflow to the registry using atomic pointer swap.
    /// This operation is lock-free and doesn't block concurrent runs.
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        let compiled = compile_workflow(workflow)?;

        let current = self.workflows.load();
        let mut new_registry = (**current).clone();
        new_registry.insert(workflow_id.to_string(), compiled);

        self.workflows.store(Arc::new(new_registry));

        tracing::info!("Hot-reloaded workflow: {}", workflow_id);

        Ok(())
    }

    /// Get a workflow by ID (lock-free read)
    pub fn get_workflow(&self, workflow_id: &str) -> Option<CompiledWorkflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Get all workflows (used by the cron scheduler at startup)
    pub fn get_all_workflows(&self) -> Vec<Workflow> {
        self.workflows
            .load()
            .values()
            .map(|compiled| compiled.workflow.clone())
            .collect()
    }

    /// Remove a workflow from registry
    pub async fn remove_workflow(&self, workflow_id: &str) -> Result<()> {
        let current = self.workflows.load();
        let mut new_registry = (**current).clone();

        if new_registry.remove(workflow_id).is_some() {
            self.workflows.store(Arc::new(new_registry));
            tracing::info!("Removed workflow from registry: {}", workflow_id);
        }

        Ok(())
    }
}

/// Compile a workflow and extract execution metadata
///
/// Pulls out the trigger node ids and rejects workflows with no entry point,
/// the one structural rule worth enforcing before anything reaches the engine.
pub fn compile_workflow(workflow: Workflow) -> Result<CompiledWorkflow> {
    let trigger_node_ids: Vec<String> = workflow
        .nodes
        .iter()
        .filter(|node| node.is_trigger())
        .map(|node| node.id.clone())
        .collect();

    if trigger_node_ids.is_empty() {
        return Err(anyhow::anyhow!("Workflow must have at least one trigger node"));
    }

    Ok(CompiledWorkflow { workflow, trigger_node_ids })
}
