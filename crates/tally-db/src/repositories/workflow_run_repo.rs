//! Workflow run repository implementation
//!
//! Persists billing-period workflow instances so the runtime can resume
//! them after a process restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tally_core::{
    models::{WorkflowRun, WorkflowRunStatus},
    traits::WorkflowRunRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of WorkflowRunRepository
pub struct PgWorkflowRunRepository {
    pool: PgPool,
}

impl PgWorkflowRunRepository {
    /// Create a new workflow run repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRunRepository for PgWorkflowRunRepository {
    #[instrument(skip(self, run))]
    async fn upsert_running(&self, run: &WorkflowRun) -> AppResult<()> {
        debug!("Recording running workflow {}", run.workflow_id);

        sqlx::query(
            r#"
            INSERT INTO workflow_runs (workflow_id, bill_id, start_time, end_time, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workflow_id) DO UPDATE
            SET status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(&run.workflow_id)
        .bind(run.bill_id)
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(WorkflowRunStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error recording workflow run: {}", e);
            AppError::Database(format!("Failed to record workflow run: {}", e))
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_status(&self, workflow_id: &str, status: WorkflowRunStatus) -> AppResult<()> {
        debug!("Setting workflow {} status to {}", workflow_id, status);

        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2,
                updated_at = NOW()
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating workflow run status: {}", e);
            AppError::Database(format!("Failed to update workflow run: {}", e))
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_running(&self) -> AppResult<Vec<WorkflowRun>> {
        let rows = sqlx::query_as::<sqlx::Postgres, WorkflowRunRow>(
            r#"
            SELECT workflow_id, bill_id, start_time, end_time, status, created_at, updated_at
            FROM workflow_runs
            WHERE status = 'running'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading running workflows: {}", e);
            AppError::Database(format!("Failed to load running workflows: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct WorkflowRunRow {
    workflow_id: String,
    bill_id: i32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WorkflowRunRow> for WorkflowRun {
    fn from(row: WorkflowRunRow) -> Self {
        Self {
            workflow_id: row.workflow_id,
            bill_id: row.bill_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status: WorkflowRunStatus::from_str(&row.status).unwrap_or(WorkflowRunStatus::Running),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
