//! Bill state machine
//!
//! The single owner of bill mutation: every status transition, line item
//! insertion, and total recomputation runs inside a database transaction
//! holding a row-level exclusive lock on the target bill.
//!
//! The machine itself is stateless and reentrant. The active transaction is
//! never stored on the machine; it is threaded through the callback as a
//! `BillTx` context, so one instance can serve concurrent callers working
//! on different bills.

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tally_core::{
    models::{Bill, BillStatus, LineItem, NewLineItem},
    AppError, AppResult,
};
use tracing::{error, instrument, warn};

use tally_db::repositories::bill_repo::{
    get_bill_for_update, refresh_bill_total, update_bill_closure, update_bill_status,
};
use tally_db::repositories::line_item_repo::create_line_item;

/// Transaction context passed to `with_bill_lock` callbacks.
///
/// All helpers run on the same transaction that holds the bill lock, so
/// their writes commit atomically with the surrounding operation. Each
/// transition helper re-checks legality with a status guard in SQL; an
/// illegal transition surfaces as `FailedPrecondition`.
pub struct BillTx {
    tx: Transaction<'static, Postgres>,
}

impl BillTx {
    pub(crate) fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// active → closing, recording the close reason
    pub async fn transition_to_closing(&mut self, bill_id: i32, reason: &str) -> AppResult<Bill> {
        update_bill_closure(
            self.conn(),
            bill_id,
            &[BillStatus::Active],
            BillStatus::Closing,
            Some(reason),
            None,
            false,
        )
        .await?
        .ok_or_else(|| {
            AppError::FailedPrecondition(
                "bill must be in active status to transition to closing".to_string(),
            )
        })
    }

    /// {pending, closing} → closed, recording the close reason and stamping
    /// `billed_at`
    pub async fn transition_to_closed(&mut self, bill_id: i32, reason: &str) -> AppResult<Bill> {
        update_bill_closure(
            self.conn(),
            bill_id,
            &[BillStatus::Pending, BillStatus::Closing],
            BillStatus::Closed,
            Some(reason),
            None,
            true,
        )
        .await?
        .ok_or_else(|| {
            AppError::FailedPrecondition(
                "bill must be in pending or closing status to transition to closed".to_string(),
            )
        })
    }

    /// any non-terminal → attention_required, recording the failure detail.
    ///
    /// Rejected when the bill is already terminal (closed or
    /// attention_required).
    pub async fn transition_to_failure(&mut self, bill_id: i32, message: &str) -> AppResult<Bill> {
        update_bill_closure(
            self.conn(),
            bill_id,
            &[BillStatus::Pending, BillStatus::Active, BillStatus::Closing],
            BillStatus::AttentionRequired,
            None,
            Some(message),
            false,
        )
        .await?
        .ok_or_else(|| {
            AppError::FailedPrecondition("bill is already in terminal status".to_string())
        })
    }

    /// Recompute `total_amount_cents` from the bill's line items.
    /// Returns the new total.
    pub async fn update_bill_total(&mut self, bill_id: i32) -> AppResult<i64> {
        refresh_bill_total(self.conn(), bill_id).await
    }

    /// Insert a line item for the locked bill
    pub async fn insert_line_item(&mut self, params: &NewLineItem) -> AppResult<LineItem> {
        create_line_item(self.conn(), params).await
    }
}

/// Bill state machine
///
/// Owns the transaction boundary for all bill mutations. Holds only the
/// connection pool; see `with_bill_lock` for the locking protocol.
pub struct BillStateMachine {
    pool: PgPool,
}

impl BillStateMachine {
    /// Create a new bill state machine
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run `op` while holding an exclusive row lock on the bill.
    ///
    /// Opens a transaction, reads the bill with `SELECT ... FOR UPDATE`
    /// (missing bill → `NotFound`), and invokes the callback with the locked
    /// row and a `BillTx` bound to the same transaction. Commits when the
    /// callback returns `Ok`; rolls back on any error.
    ///
    /// Two concurrent calls for the same bill serialize on the row lock;
    /// unrelated bills do not contend. Callbacks must not call
    /// `with_bill_lock` again, for any bill: the nested call would enlist a
    /// second connection and can deadlock against the lock already held.
    #[instrument(skip(self, op))]
    pub async fn with_bill_lock<T, F>(&self, bill_id: i32, op: F) -> AppResult<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a Bill, &'a mut BillTx) -> BoxFuture<'a, AppResult<T>> + Send,
    {
        let tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let mut bill_tx = BillTx { tx };

        let bill = get_bill_for_update(bill_tx.conn(), bill_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bill {} not found", bill_id)))?;

        match op(&bill, &mut bill_tx).await {
            Ok(value) => {
                bill_tx.tx.commit().await.map_err(|e| {
                    error!("Failed to commit transaction: {}", e);
                    AppError::Transaction(format!("Failed to commit transaction: {}", e))
                })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = bill_tx.tx.rollback().await {
                    warn!("Rollback failed after {}: {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }

    /// pending → active.
    ///
    /// Takes the bill lock itself; legal only from `pending`.
    #[instrument(skip(self))]
    pub async fn transition_to_active(&self, bill_id: i32) -> AppResult<Bill> {
        self.with_bill_lock(bill_id, |bill, tx| {
            Box::pin(async move {
                if bill.status != BillStatus::Pending {
                    return Err(AppError::FailedPrecondition(format!(
                        "bill must be in pending status to transition to active (currently {})",
                        bill.status
                    )));
                }

                update_bill_status(
                    tx.conn(),
                    bill.id,
                    &[BillStatus::Pending],
                    BillStatus::Active,
                )
                .await?
                .ok_or_else(|| {
                    AppError::FailedPrecondition(
                        "bill must be in pending status to transition to active".to_string(),
                    )
                })
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/tally_billing".to_string());
        PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("Failed to connect to test database")
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_with_bill_lock_missing_bill() {
        let sm = BillStateMachine::new(test_pool().await);

        let result = sm
            .with_bill_lock(-1, |_, _| Box::pin(async { Ok(()) }))
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_callback_error_rolls_back() {
        let pool = test_pool().await;
        let sm = BillStateMachine::new(pool.clone());

        let bill: (i32,) = sqlx::query_as(
            r#"
            INSERT INTO bills (currency, status, start_time, end_time, idempotency_key, workflow_id)
            VALUES ('USD', 'active', NOW(), NOW() + INTERVAL '1 hour', gen_random_uuid()::text, 'bill-test')
            RETURNING id
            "#,
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let result: AppResult<()> = sm
            .with_bill_lock(bill.0, |locked, tx| {
                Box::pin(async move {
                    tx.transition_to_closing(locked.id, "test").await?;
                    Err(AppError::Internal("forced failure".to_string()))
                })
            })
            .await;
        assert!(result.is_err());

        // The closing transition must not have survived the rollback
        let status: (String,) = sqlx::query_as("SELECT status FROM bills WHERE id = $1")
            .bind(bill.0)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status.0, "active");
    }
}
