//! Billing business layer
//!
//! The only caller of the bill state machine. Enforces the user-facing
//! status rules (with readable error messages on top of the state machine's
//! defensive guards), applies currency conversion, and keeps the bill total
//! consistent with its line items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tally_core::{
    models::{Bill, BillStatus, LineItem, NewBill, NewLineItem},
    traits::{BillRepository, BillingOps, LineItemRepository, PageRequest},
    AppError, AppResult,
};
use tracing::{info, instrument, warn};

use crate::currency::CurrencyService;
use crate::state_machine::BillStateMachine;

/// Parameters for adding a line item, as submitted by the client
#[derive(Debug, Clone)]
pub struct LineItemParams {
    pub currency: String,
    pub amount_cents: i64,
    pub description: String,
    pub reference_id: String,
    pub idempotency_key: String,
}

/// A created line item together with the owning bill's workflow id,
/// so the caller can signal the workflow after commit.
#[derive(Debug, Clone)]
pub struct CreatedLineItem {
    pub line_item: LineItem,
    pub workflow_id: String,
}

/// Billing service
pub struct BillingService {
    state_machine: BillStateMachine,
    bills: Arc<dyn BillRepository>,
    line_items: Arc<dyn LineItemRepository>,
    currencies: CurrencyService,
}

impl BillingService {
    /// Create a new billing service
    pub fn new(
        state_machine: BillStateMachine,
        bills: Arc<dyn BillRepository>,
        line_items: Arc<dyn LineItemRepository>,
        currencies: CurrencyService,
    ) -> Self {
        Self {
            state_machine,
            bills,
            line_items,
            currencies,
        }
    }

    /// Create a bill for the period `[start_time, end_time)`.
    ///
    /// The currency must be enabled. A duplicate idempotency key yields
    /// `AlreadyExists`.
    #[instrument(skip(self))]
    pub async fn create_bill(
        &self,
        currency: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        idempotency_key: &str,
    ) -> AppResult<Bill> {
        let currency = self.currencies.ensure_enabled(currency).await?;

        let bill = self
            .bills
            .create(&NewBill {
                currency: currency.code,
                start_time,
                end_time,
                idempotency_key: idempotency_key.to_string(),
                workflow_id: Bill::workflow_id_for(idempotency_key),
            })
            .await?;

        info!(
            bill_id = bill.id,
            workflow_id = %bill.workflow_id,
            "Created bill"
        );

        Ok(bill)
    }

    /// Add a line item to an active bill.
    ///
    /// Runs entirely inside the bill lock: the status check, the currency
    /// conversion result, the insert, and the total refresh commit
    /// atomically. The stored amount is in the bill's currency.
    #[instrument(skip(self, params))]
    pub async fn add_line_item(
        &self,
        bill_id: i32,
        params: LineItemParams,
    ) -> AppResult<CreatedLineItem> {
        // Cloned so the callback future owns everything it captures
        let currencies = self.currencies.clone();

        self.state_machine
            .with_bill_lock(bill_id, move |bill, tx| {
                Box::pin(async move {
                    match bill.status {
                        BillStatus::Active => {}
                        BillStatus::Pending => {
                            return Err(AppError::FailedPrecondition(
                                "bill is not active yet; line items can be added once the billing period starts"
                                    .to_string(),
                            ))
                        }
                        BillStatus::Closing => {
                            return Err(AppError::FailedPrecondition(
                                "bill is currently being closed".to_string(),
                            ))
                        }
                        BillStatus::Closed => {
                            return Err(AppError::FailedPrecondition(
                                "bill is closed and no longer accepts line items".to_string(),
                            ))
                        }
                        BillStatus::AttentionRequired => {
                            return Err(AppError::FailedPrecondition(
                                "bill requires attention and no longer accepts line items"
                                    .to_string(),
                            ))
                        }
                    }

                    let (amount_cents, metadata) = currencies
                        .convert(params.amount_cents, &params.currency, &bill.currency)
                        .await?;

                    let line_item = tx
                        .insert_line_item(&NewLineItem {
                            bill_id,
                            amount_cents,
                            currency: bill.currency.clone(),
                            description: params.description,
                            reference_id: params.reference_id,
                            incurred_at: Utc::now(),
                            metadata,
                            idempotency_key: params.idempotency_key,
                        })
                        .await?;

                    let total = tx.update_bill_total(bill_id).await?;

                    info!(
                        bill_id,
                        line_item_id = line_item.id,
                        total_amount_cents = total,
                        "Added line item"
                    );

                    Ok(CreatedLineItem {
                        line_item,
                        workflow_id: bill.workflow_id.clone(),
                    })
                })
            })
            .await
    }

    /// Close a bill.
    ///
    /// Idempotent: closing an already-closed bill returns it unchanged.
    /// Pending bills close early; active bills pass through closing; a bill
    /// in attention_required cannot be closed. The total is recomputed one
    /// final time before the terminal transition.
    #[instrument(skip(self))]
    pub async fn close_bill(&self, bill_id: i32, reason: &str) -> AppResult<Bill> {
        let reason = reason.to_string();

        self.state_machine
            .with_bill_lock(bill_id, move |bill, tx| {
                Box::pin(async move {
                    match bill.status {
                        BillStatus::Closed => {
                            info!(bill_id, "Bill is already closed");
                            Ok(bill.clone())
                        }
                        BillStatus::AttentionRequired => Err(AppError::FailedPrecondition(
                            "bill requires attention and cannot be closed".to_string(),
                        )),
                        BillStatus::Pending => {
                            tx.update_bill_total(bill_id).await?;
                            let closed = tx.transition_to_closed(bill_id, &reason).await?;
                            info!(bill_id, reason = %reason, "Closed pending bill early");
                            Ok(closed)
                        }
                        BillStatus::Active => {
                            tx.transition_to_closing(bill_id, &reason).await?;
                            tx.update_bill_total(bill_id).await?;
                            let closed = tx.transition_to_closed(bill_id, &reason).await?;
                            info!(
                                bill_id,
                                reason = %reason,
                                total_amount_cents = closed.total_amount_cents,
                                "Closed bill"
                            );
                            Ok(closed)
                        }
                        BillStatus::Closing => {
                            // A previous close attempt got as far as closing;
                            // finish the job.
                            tx.update_bill_total(bill_id).await?;
                            let closed = tx.transition_to_closed(bill_id, &reason).await?;
                            info!(bill_id, reason = %reason, "Finalized bill left in closing");
                            Ok(closed)
                        }
                    }
                })
            })
            .await
    }

    /// Recompute the bill's materialized total under the bill lock.
    /// Returns the new total.
    #[instrument(skip(self))]
    pub async fn update_bill_total(&self, bill_id: i32) -> AppResult<i64> {
        self.state_machine
            .with_bill_lock(bill_id, move |bill, tx| {
                Box::pin(async move {
                    if bill.status == BillStatus::AttentionRequired {
                        return Err(AppError::FailedPrecondition(
                            "bill requires attention; totals are frozen".to_string(),
                        ));
                    }
                    tx.update_bill_total(bill_id).await
                })
            })
            .await
    }

    /// Mark a bill as requiring operator attention
    #[instrument(skip(self))]
    pub async fn mark_attention_required(&self, bill_id: i32, message: &str) -> AppResult<Bill> {
        let message = message.to_string();

        self.state_machine
            .with_bill_lock(bill_id, move |_, tx| {
                Box::pin(async move { tx.transition_to_failure(bill_id, &message).await })
            })
            .await
    }

    /// Get a bill with its line items
    #[instrument(skip(self))]
    pub async fn get_bill(&self, bill_id: i32) -> AppResult<(Bill, Vec<LineItem>)> {
        let bill = self
            .bills
            .find_by_id(bill_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bill {} not found", bill_id)))?;
        let line_items = self.line_items.find_by_bill(bill_id).await?;
        Ok((bill, line_items))
    }

    /// Page through bills, returning the page and the total count
    #[instrument(skip(self))]
    pub async fn list_bills(&self, page: PageRequest) -> AppResult<(Vec<Bill>, i64)> {
        self.bills.find_page(page.limit, page.offset).await
    }
}

#[async_trait]
impl BillingOps for BillingService {
    /// Activate a bill for its billing period.
    ///
    /// Safe to retry: once a first attempt has committed, subsequent calls
    /// observe the bill already active and succeed.
    async fn activate_bill(&self, bill_id: i32) -> AppResult<()> {
        match self.state_machine.transition_to_active(bill_id).await {
            Ok(bill) => {
                info!(bill_id = bill.id, "Activated bill");
                Ok(())
            }
            Err(AppError::FailedPrecondition(msg)) => {
                let bill = self
                    .bills
                    .find_by_id(bill_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("bill {} not found", bill_id)))?;
                if bill.status == BillStatus::Active {
                    warn!(bill_id, "Bill already active; treating activation as success");
                    Ok(())
                } else {
                    Err(AppError::FailedPrecondition(msg))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn close_bill(&self, bill_id: i32, reason: &str) -> AppResult<()> {
        BillingService::close_bill(self, bill_id, reason).await.map(|_| ())
    }

    async fn update_bill_total(&self, bill_id: i32) -> AppResult<()> {
        BillingService::update_bill_total(self, bill_id)
            .await
            .map(|_| ())
    }
}
