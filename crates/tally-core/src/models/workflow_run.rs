//! Workflow run records
//!
//! Persistent state for billing-period workflow instances. A row per
//! workflow survives process restarts so the runtime can resume pending
//! instances with their remaining timers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl WorkflowRunStatus {
    /// Database string value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    /// Parse from a database string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A billing-period workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Workflow identifier, derived from the bill's idempotency key
    pub workflow_id: String,

    /// Bill owned by this workflow
    pub bill_id: i32,

    /// Billing period start
    pub start_time: DateTime<Utc>,

    /// Billing period end
    pub end_time: DateTime<Utc>,

    /// Current run status
    pub status: WorkflowRunStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
