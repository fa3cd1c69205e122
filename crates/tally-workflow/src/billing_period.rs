//! Billing period workflow
//!
//! One instance per bill. Timeline:
//!
//! 1. Sleep until the period starts (restarts resume the remaining sleep,
//!    since the deadline is recomputed from the persisted timestamps).
//! 2. If the period is empty or inverted, close with `invalid_period`.
//! 3. Activate the bill.
//! 4. Select over signals and the end-of-period timer until the bill closes.

use chrono::Utc;
use std::sync::Arc;
use tally_core::AppResult;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::activities::Activities;
use crate::signals::Signal;

/// Close reason recorded when the period deadline fires
pub const CLOSE_REASON_AUTO: &str = "auto_close";

/// Close reason recorded when end_time is not after start_time
pub const CLOSE_REASON_INVALID_PERIOD: &str = "invalid_period";

/// Parameters for starting a billing period workflow
#[derive(Debug, Clone)]
pub struct BillingPeriodParams {
    pub bill_id: i32,
    pub start_time: chrono::DateTime<Utc>,
    pub end_time: chrono::DateTime<Utc>,
}

/// Run the billing period workflow for one bill.
///
/// Signals that arrive before activation sit in the channel and are drained
/// once the select loop starts; a close signal becomes effective only after
/// the bill is active.
pub async fn billing_period(
    params: BillingPeriodParams,
    activities: Arc<Activities>,
    mut signals: mpsc::Receiver<Signal>,
) -> AppResult<()> {
    info!(
        bill_id = params.bill_id,
        start_time = %params.start_time,
        end_time = %params.end_time,
        "Starting billing period workflow"
    );

    let now = Utc::now();
    if params.start_time > now {
        let wait = (params.start_time - now).to_std().unwrap_or_default();
        info!(
            bill_id = params.bill_id,
            wait_ms = wait.as_millis() as u64,
            "Waiting for start time"
        );
        sleep(wait).await;
        info!(bill_id = params.bill_id, "Start time reached");
    }

    if params.end_time <= params.start_time {
        warn!(
            bill_id = params.bill_id,
            "End time is not after start time, closing immediately"
        );
        return activities
            .close_bill(params.bill_id, CLOSE_REASON_INVALID_PERIOD)
            .await;
    }

    activities.activate_bill(params.bill_id).await.map_err(|err| {
        error!(bill_id = params.bill_id, error = %err, "Failed to activate bill");
        err
    })?;

    // Deadline against the wall clock: a resumed workflow sleeps only
    // whatever is left of the period.
    let remaining = (params.end_time - Utc::now()).to_std().unwrap_or_default();
    info!(
        bill_id = params.bill_id,
        remaining_ms = remaining.as_millis() as u64,
        "Entering active billing period"
    );

    let period_end = sleep(remaining);
    tokio::pin!(period_end);

    let mut signals_open = true;

    loop {
        tokio::select! {
            maybe_signal = signals.recv(), if signals_open => match maybe_signal {
                Some(Signal::AddLineItem(signal)) => {
                    info!(
                        bill_id = params.bill_id,
                        line_item_id = signal.line_item_id,
                        "Tracking line item addition"
                    );
                    if let Err(err) = activities.update_bill_total(params.bill_id).await {
                        // The next signal or the closing refresh repairs the total
                        error!(
                            bill_id = params.bill_id,
                            line_item_id = signal.line_item_id,
                            error = %err,
                            "Failed to recalculate bill total after line item addition"
                        );
                    }
                }
                Some(Signal::CloseBill(signal)) => {
                    info!(
                        bill_id = params.bill_id,
                        reason = %signal.reason,
                        closed_by = %signal.closed_by,
                        "Received manual close bill signal"
                    );
                    match activities.close_bill(params.bill_id, &signal.reason).await {
                        Ok(()) => {
                            info!(bill_id = params.bill_id, "Successfully closed bill manually");
                            return Ok(());
                        }
                        Err(err) => {
                            error!(
                                bill_id = params.bill_id,
                                error = %err,
                                "Failed to close bill manually"
                            );
                        }
                    }
                }
                None => {
                    // Sender side dropped; keep waiting on the timer alone
                    signals_open = false;
                }
            },
            () = &mut period_end => {
                info!(bill_id = params.bill_id, "Auto-closing bill due to end time reached");
                activities
                    .close_bill(params.bill_id, CLOSE_REASON_AUTO)
                    .await
                    .map_err(|err| {
                        error!(bill_id = params.bill_id, error = %err, "Failed to auto-close bill");
                        err
                    })?;
                info!(bill_id = params.bill_id, "Billing period workflow completed");
                return Ok(());
            }
        }
    }
}
