//! Workflow runtime
//!
//! Owns the set of running billing-period workflow instances: a registry of
//! signal senders and join handles keyed by workflow id, backed by
//! `workflow_runs` rows for durability. On startup `resume_pending` reloads
//! every running row and re-spawns its workflow; timers pick up from the
//! persisted period bounds.

use std::collections::HashMap;
use std::sync::Arc;
use tally_core::{
    config::WorkflowConfig,
    models::{WorkflowRun, WorkflowRunStatus},
    traits::WorkflowRunRepository,
    AppError, AppResult,
};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::activities::Activities;
use crate::billing_period::{billing_period, BillingPeriodParams};
use crate::signals::Signal;

/// A running workflow instance
struct WorkflowHandle {
    signals: mpsc::Sender<Signal>,
    join: JoinHandle<()>,
}

/// Workflow runtime
///
/// Cheap to clone; all state is shared behind Arcs.
#[derive(Clone)]
pub struct WorkflowRuntime {
    activities: Arc<Activities>,
    runs: Arc<dyn WorkflowRunRepository>,
    instances: Arc<RwLock<HashMap<String, WorkflowHandle>>>,
    task_queue: Arc<str>,
    signal_buffer: usize,
}

impl WorkflowRuntime {
    /// Create a new workflow runtime serving the configured task queue
    pub fn new(
        activities: Arc<Activities>,
        runs: Arc<dyn WorkflowRunRepository>,
        config: &WorkflowConfig,
    ) -> Self {
        info!(task_queue = %config.task_queue, "Initializing workflow runtime");
        Self {
            activities,
            runs,
            instances: Arc::new(RwLock::new(HashMap::new())),
            task_queue: Arc::from(config.task_queue.as_str()),
            signal_buffer: config.signal_buffer,
        }
    }

    /// The logical task queue this runtime serves
    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    /// Start a billing period workflow.
    ///
    /// Starting an already-running workflow id is a no-op, so duplicate
    /// create requests collapse into a single instance.
    #[instrument(skip(self, params))]
    pub async fn start(&self, workflow_id: &str, params: BillingPeriodParams) -> AppResult<()> {
        let run = WorkflowRun {
            workflow_id: workflow_id.to_string(),
            bill_id: params.bill_id,
            start_time: params.start_time,
            end_time: params.end_time,
            status: WorkflowRunStatus::Running,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        {
            let instances = self.instances.read().await;
            if instances.contains_key(workflow_id) {
                info!(workflow_id, "Workflow already started");
                return Ok(());
            }
        }

        self.runs.upsert_running(&run).await?;

        if !self.spawn(workflow_id.to_string(), params).await {
            info!(workflow_id, "Workflow already started");
            return Ok(());
        }

        info!(
            workflow_id,
            bill_id = run.bill_id,
            task_queue = %self.task_queue,
            "Started billing period workflow"
        );
        Ok(())
    }

    /// Re-spawn every workflow recorded as running. Called once at startup.
    #[instrument(skip(self))]
    pub async fn resume_pending(&self) -> AppResult<usize> {
        let running = self.runs.find_running().await?;
        let mut resumed = 0usize;

        for run in running {
            let params = BillingPeriodParams {
                bill_id: run.bill_id,
                start_time: run.start_time,
                end_time: run.end_time,
            };
            if self.spawn(run.workflow_id.clone(), params).await {
                info!(
                    workflow_id = %run.workflow_id,
                    bill_id = run.bill_id,
                    "Resumed billing period workflow"
                );
                resumed += 1;
            }
        }

        if resumed > 0 {
            info!("Resumed {} billing period workflows", resumed);
        }
        Ok(resumed)
    }

    /// Deliver a signal to a running workflow.
    ///
    /// Fails with `NotFound` when the workflow is not running; the caller
    /// logs and drops, since a finished workflow no longer needs signals.
    #[instrument(skip(self, signal))]
    pub async fn signal(&self, workflow_id: &str, signal: Signal) -> AppResult<()> {
        let name = signal.name();
        let sender = {
            let instances = self.instances.read().await;
            instances.get(workflow_id).map(|h| h.signals.clone())
        }
        .ok_or_else(|| {
            AppError::NotFound(format!("workflow {} is not running", workflow_id))
        })?;

        sender.send(signal).await.map_err(|_| {
            AppError::Internal(format!(
                "workflow {} stopped accepting signals",
                workflow_id
            ))
        })?;

        debug!(workflow_id, signal = name, "Delivered workflow signal");
        Ok(())
    }

    /// Terminate a running workflow without compensation.
    ///
    /// Used after a manual close has already succeeded, so the instance
    /// does not execute a duplicate auto-close. Terminating a finished
    /// workflow is a no-op.
    #[instrument(skip(self))]
    pub async fn terminate(&self, workflow_id: &str) -> AppResult<()> {
        let handle = {
            let mut instances = self.instances.write().await;
            instances.remove(workflow_id)
        };

        match handle {
            Some(handle) => {
                handle.join.abort();
                self.runs
                    .set_status(workflow_id, WorkflowRunStatus::Terminated)
                    .await?;
                info!(workflow_id, "Terminated workflow");
            }
            None => {
                debug!(workflow_id, "Terminate requested for workflow that is not running");
            }
        }
        Ok(())
    }

    /// Abort all running instances without touching their persisted status,
    /// so they resume on the next startup.
    pub async fn shutdown(&self) {
        let mut instances = self.instances.write().await;
        let count = instances.len();
        for (_, handle) in instances.drain() {
            handle.join.abort();
        }
        if count > 0 {
            info!("Aborted {} workflow instances for shutdown", count);
        }
    }

    /// Number of currently running instances
    pub async fn running_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Spawn an instance unless one with this id is already running.
    /// Returns whether a new instance was spawned.
    async fn spawn(&self, workflow_id: String, params: BillingPeriodParams) -> bool {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&workflow_id) {
            return false;
        }

        let (signal_tx, signal_rx) = mpsc::channel(self.signal_buffer);
        let activities = self.activities.clone();
        let runs = self.runs.clone();
        let registry = self.instances.clone();
        let task_workflow_id = workflow_id.clone();

        let join = tokio::spawn(async move {
            let result = billing_period(params, activities, signal_rx).await;

            let status = match &result {
                Ok(()) => WorkflowRunStatus::Completed,
                Err(_) => WorkflowRunStatus::Failed,
            };
            if let Err(err) = runs.set_status(&task_workflow_id, status).await {
                error!(
                    workflow_id = %task_workflow_id,
                    error = %err,
                    "Failed to record workflow completion status"
                );
            }

            registry.write().await.remove(&task_workflow_id);

            match result {
                Ok(()) => debug!(workflow_id = %task_workflow_id, "Workflow completed"),
                Err(err) => {
                    warn!(workflow_id = %task_workflow_id, error = %err, "Workflow failed")
                }
            }
        });

        instances.insert(
            workflow_id,
            WorkflowHandle {
                signals: signal_tx,
                join,
            },
        );
        true
    }
}
