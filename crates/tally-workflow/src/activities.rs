//! Workflow activities
//!
//! Thin idempotent wrappers over the business layer, executed under
//! per-activity retry policies. Dependencies are injected at construction
//! and bound to the runtime at startup; there is no process-wide registry.

use std::sync::Arc;
use tally_core::{traits::BillingOps, AppResult};
use tracing::{info, instrument};

use crate::retry::{retry, RetryPolicy};

/// Activity executor with injected business dependencies
pub struct Activities {
    ops: Arc<dyn BillingOps>,
}

impl Activities {
    /// Create a new activity executor
    pub fn new(ops: Arc<dyn BillingOps>) -> Self {
        Self { ops }
    }

    /// Transition a bill to active when its billing period begins.
    ///
    /// Retried attempts after a committed first attempt observe the bill
    /// already active and succeed.
    #[instrument(skip(self))]
    pub async fn activate_bill(&self, bill_id: i32) -> AppResult<()> {
        retry(RetryPolicy::ACTIVATE, "activate_bill", || {
            self.ops.activate_bill(bill_id)
        })
        .await?;

        info!(bill_id, "Activate bill activity completed");
        Ok(())
    }

    /// Close a bill with the given reason.
    ///
    /// A no-op success when the bill is already closed, so duplicate close
    /// paths (manual close racing auto-close) converge.
    #[instrument(skip(self))]
    pub async fn close_bill(&self, bill_id: i32, reason: &str) -> AppResult<()> {
        retry(RetryPolicy::CLOSE, "close_bill", || {
            self.ops.close_bill(bill_id, reason)
        })
        .await?;

        info!(bill_id, reason, "Close bill activity completed");
        Ok(())
    }

    /// Recompute the bill's materialized total. Naturally idempotent.
    #[instrument(skip(self))]
    pub async fn update_bill_total(&self, bill_id: i32) -> AppResult<()> {
        retry(RetryPolicy::UPDATE_TOTAL, "update_bill_total", || {
            self.ops.update_bill_total(bill_id)
        })
        .await?;

        info!(bill_id, "Update bill total activity completed");
        Ok(())
    }
}
