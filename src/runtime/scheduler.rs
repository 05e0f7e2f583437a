/// Background cron scheduler service
///
/// Manages scheduled trigger nodes using tokio-cron-scheduler. Every trigger
/// node carrying a cron schedule gets a registered job that fires the engine
/// with that exact trigger id, so scheduled runs activate only their own
/// branch of the workflow.

use crate::{
    runtime::engine::{ExecutionEngine, TracingObserver},
    workflow::{
        registry::WorkflowRegistry,
        storage::WorkflowStorage,
        types::{NodeKind, Workflow, WorkflowNode},
    },
};
use anyhow::Result;
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Hot-reload cron scheduler service
///
/// Tracks job UUIDs per (workflow, trigger) pair so schedule changes swap
/// jobs in place without restarting the scheduler.
pub struct CronSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    registry: Arc<WorkflowRegistry>,
    engine: Arc<ExecutionEngine>,
    storage: WorkflowStorage,
}

impl CronSchedulerService {
    /// Create new scheduler service.
    pub async fn new(
        registry: Arc<WorkflowRegistry>,
        engine: Arc<ExecutionEngine>,
        storage: WorkflowStorage,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            registry,
            engine,
            storage,
        })
    }

    /// Start the scheduler and register all scheduled triggers from workflows.
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron scheduler service");

        self.register_all_scheduled_triggers().await?;

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler and drop all tracked jobs.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron scheduler service");

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.clear();
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Cron scheduler stopped");
        Ok(())
    }

    /// Add or update the scheduled triggers of one workflow (hot reload).
    pub async fn add_or_update_workflow_triggers(&self, workflow: &Workflow) -> Result<()> {
        let scheduled: Vec<(&WorkflowNode, &str)> = workflow
            .nodes
            .iter()
            .filter_map(|node| match &node.kind {
                NodeKind::Trigger { schedule: Some(schedule), .. } => {
                    Some((node, schedule.as_str()))
                }
                _ => None,
            })
            .collect();

        if scheduled.is_empty() {
            tracing::debug!("📋 No scheduled triggers in workflow: {}", workflow.id);
            self.remove_workflow_triggers(&workflow.id).await;
            return Ok(());
        }

        let trigger_count = scheduled.len();
        for (node, schedule) in scheduled {
            self.add_or_update_job(&workflow.id, &node.id, schedule).await?;
        }

        tracing::info!(
            "🔥 Registered {} scheduled triggers for workflow: {}",
            trigger_count,
            workflow.id
        );
        Ok(())
    }

    /// Remove every scheduled trigger job belonging to a workflow.
    pub async fn remove_workflow_triggers(&self, workflow_id: &str) {
        let mut job_uuid_map = self.job_uuid_map.write().await;
        let keys_to_remove: Vec<String> = job_uuid_map
            .keys()
            .filter(|key| key.starts_with(&format!("{}:", workflow_id)))
            .cloned()
            .collect();

        for key in keys_to_remove {
            if let Some(job_uuid) = job_uuid_map.remove(&key) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&job_uuid).await {
                    tracing::warn!("⚠️ Failed to remove job {} from scheduler: {}", key, e);
                } else {
                    tracing::debug!("🛑 Removed cron job: {}", key);
                }
            }
        }
    }

    /// Swap in a job for one scheduled trigger node.
    async fn add_or_update_job(
        &self,
        workflow_id: &str,
        trigger_node_id: &str,
        schedule: &str,
    ) -> Result<()> {
        let job_id = format!("{}:{}", workflow_id, trigger_node_id);
        tracing::info!("⏰ Registering cron job: {} - schedule: {}", job_id, schedule);

        // Drop any previous job for this trigger before adding the new one.
        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            if let Some(old_job_uuid) = job_uuid_map.remove(&job_id) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&old_job_uuid).await {
                    tracing::warn!("⚠️ Failed to remove old job {}: {}", job_id, e);
                }
            }
        }

        let workflow_id_owned = workflow_id.to_string();
        let trigger_id_owned = trigger_node_id.to_string();
        let registry = Arc::clone(&self.registry);
        let engine = Arc::clone(&self.engine);
        let storage = self.storage.clone();

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let workflow_id = workflow_id_owned.clone();
            let trigger_id = trigger_id_owned.clone();
            let registry = Arc::clone(&registry);
            let engine = Arc::clone(&engine);
            let storage = storage.clone();

            Box::pin(async move {
                tracing::debug!("🔔 Cron trigger fired: {} in workflow {}", trigger_id, workflow_id);

                // Workflows deleted since registration skip silently.
                let Some(compiled) = registry.get_workflow(&workflow_id) else {
                    tracing::debug!("⏭️ Skipping cron trigger for deleted workflow: {}", workflow_id);
                    return;
                };

                let mut context = BTreeMap::new();
                context.insert("trigger_type".to_string(), "cron".to_string());
                context.insert("fired_at".to_string(), Utc::now().to_rfc3339());

                let run_start = std::time::Instant::now();
                let result = engine
                    .execute(&compiled.workflow, Some(&trigger_id), &context, Some(&TracingObserver))
                    .await;
                let duration_ms = run_start.elapsed().as_millis() as i64;

                // Scheduled runs land in the same history the API serves.
                if let Err(e) = storage.record_run(&result, duration_ms).await {
                    tracing::error!("Failed to record scheduled run for {}: {}", workflow_id, e);
                }

                if result.success {
                    tracing::info!("✅ Scheduled run completed: {}", workflow_id);
                } else {
                    tracing::error!("❌ Scheduled run failed: {} - {}", workflow_id, result.message);
                }
            })
        })?;

        let new_job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.insert(job_id.clone(), new_job_uuid);
        }

        tracing::debug!("✅ Cron job registered: {} ({})", job_id, schedule);
        Ok(())
    }

    /// Register scheduled triggers from every stored workflow (startup only).
    async fn register_all_scheduled_triggers(&self) -> Result<()> {
        let workflows = self.registry.get_all_workflows();
        let workflow_count = workflows.len();
        let mut total_triggers = 0;

        for workflow in workflows {
            let trigger_count = workflow
                .nodes
                .iter()
                .filter(|node| {
                    matches!(&node.kind, NodeKind::Trigger { schedule: Some(_), .. })
                })
                .count();

            if trigger_count > 0 {
                self.add_or_update_workflow_triggers(&workflow).await?;
                total_triggers += trigger_count;
            }
        }

        tracing::info!(
            "📊 Registered {} scheduled triggers from {} workflows",
            total_triggers,
            workflow_count
        );
        Ok(())
    }
}
