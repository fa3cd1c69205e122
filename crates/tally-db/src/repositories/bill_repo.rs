//! Bill repository implementation
//!
//! Pool-backed CRUD and paging, plus the connection-level operations used
//! inside the state machine's locked transactions: the `FOR UPDATE` read,
//! guarded status transitions, and the SQL-side total recomputation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tally_core::{
    models::{Bill, BillStatus, NewBill},
    traits::BillRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

const BILL_COLUMNS: &str = r#"
    id, currency, status, total_amount_cents,
    start_time, end_time, close_reason, error_message, billed_at,
    idempotency_key, workflow_id, created_at, updated_at
"#;

/// PostgreSQL implementation of BillRepository
pub struct PgBillRepository {
    pool: PgPool,
}

impl PgBillRepository {
    /// Create a new bill repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillRepository for PgBillRepository {
    #[instrument(skip(self, params))]
    async fn create(&self, params: &NewBill) -> AppResult<Bill> {
        debug!("Creating bill with key {}", params.idempotency_key);

        let row = sqlx::query_as::<sqlx::Postgres, BillRow>(&format!(
            r#"
            INSERT INTO bills (currency, status, start_time, end_time, idempotency_key, workflow_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {BILL_COLUMNS}
            "#,
        ))
        .bind(&params.currency)
        .bind(BillStatus::Pending.as_str())
        .bind(params.start_time)
        .bind(params.end_time)
        .bind(&params.idempotency_key)
        .bind(&params.workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return AppError::AlreadyExists(format!(
                    "a bill with idempotency key {} already exists",
                    params.idempotency_key
                ));
            }
            error!("Database error creating bill: {}", e);
            AppError::Database(format!("Failed to create bill: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i32) -> AppResult<Option<Bill>> {
        debug!("Finding bill by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, BillRow>(&format!(
            "SELECT {BILL_COLUMNS} FROM bills WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding bill {}: {}", id, e);
            AppError::Database(format!("Failed to find bill: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_page(&self, limit: i64, offset: i64) -> AppResult<(Vec<Bill>, i64)> {
        debug!("Listing bills with limit {} offset {}", limit, offset);

        let rows = sqlx::query_as::<sqlx::Postgres, BillRow>(&format!(
            r#"
            SELECT {BILL_COLUMNS}
            FROM bills
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing bills: {}", e);
            AppError::Database(format!("Failed to list bills: {}", e))
        })?;

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bills")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting bills: {}", e);
                AppError::Database(format!("Failed to count bills: {}", e))
            })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }
}

// ============================================================================
// Connection-level operations for the state machine's transactions
// ============================================================================

/// Read a bill with a row-level exclusive lock (`SELECT ... FOR UPDATE`).
///
/// The lock is held until the surrounding transaction commits or rolls back.
pub async fn get_bill_for_update(conn: &mut PgConnection, id: i32) -> AppResult<Option<Bill>> {
    let result = sqlx::query_as::<sqlx::Postgres, BillRow>(&format!(
        "SELECT {BILL_COLUMNS} FROM bills WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        error!("Database error locking bill {}: {}", id, e);
        AppError::Database(format!("Failed to lock bill: {}", e))
    })?;

    Ok(result.map(Into::into))
}

/// Guarded status update: sets `status` only when the current status is in
/// `allowed_from`. Returns `None` when the guard rejects the transition.
pub async fn update_bill_status(
    conn: &mut PgConnection,
    id: i32,
    allowed_from: &[BillStatus],
    status: BillStatus,
) -> AppResult<Option<Bill>> {
    let allowed = status_strings(allowed_from);

    let row = sqlx::query_as::<sqlx::Postgres, BillRow>(&format!(
        r#"
        UPDATE bills
        SET status = $2,
            updated_at = NOW()
        WHERE id = $1 AND status = ANY($3)
        RETURNING {BILL_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status.as_str())
    .bind(&allowed)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        error!("Database error updating bill {} status: {}", id, e);
        AppError::Database(format!("Failed to update bill status: {}", e))
    })?;

    Ok(row.map(Into::into))
}

/// Guarded closure update: transitions into `closing`, `closed`, or
/// `attention_required`, writing the close reason / error message and
/// stamping `billed_at` when requested. Returns `None` when the current
/// status is not in `allowed_from`.
#[allow(clippy::too_many_arguments)]
pub async fn update_bill_closure(
    conn: &mut PgConnection,
    id: i32,
    allowed_from: &[BillStatus],
    status: BillStatus,
    close_reason: Option<&str>,
    error_message: Option<&str>,
    stamp_billed_at: bool,
) -> AppResult<Option<Bill>> {
    let allowed = status_strings(allowed_from);

    let row = sqlx::query_as::<sqlx::Postgres, BillRow>(&format!(
        r#"
        UPDATE bills
        SET status = $2,
            close_reason = $3,
            error_message = $4,
            billed_at = CASE WHEN $5 THEN NOW() ELSE billed_at END,
            updated_at = NOW()
        WHERE id = $1 AND status = ANY($6)
        RETURNING {BILL_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status.as_str())
    .bind(close_reason)
    .bind(error_message)
    .bind(stamp_billed_at)
    .bind(&allowed)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        error!("Database error closing bill {}: {}", id, e);
        AppError::Database(format!("Failed to update bill closure: {}", e))
    })?;

    Ok(row.map(Into::into))
}

/// Recompute `total_amount_cents` from the bill's line items in SQL and
/// write it back. Returns the new total.
pub async fn refresh_bill_total(conn: &mut PgConnection, id: i32) -> AppResult<i64> {
    let result: (i64,) = sqlx::query_as(
        r#"
        UPDATE bills
        SET total_amount_cents = COALESCE(
                (SELECT SUM(amount_cents) FROM line_items WHERE bill_id = $1),
                0
            ),
            updated_at = NOW()
        WHERE id = $1
        RETURNING total_amount_cents
        "#,
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        error!("Database error recomputing bill {} total: {}", id, e);
        AppError::Database(format!("Failed to recompute bill total: {}", e))
    })?;

    Ok(result.0)
}

/// Whether a sqlx error is a Postgres unique violation (SQLSTATE 23505)
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

fn status_strings(statuses: &[BillStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BillRow {
    id: i32,
    currency: String,
    status: String,
    total_amount_cents: i64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    close_reason: Option<String>,
    error_message: Option<String>,
    billed_at: Option<DateTime<Utc>>,
    idempotency_key: String,
    workflow_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BillRow> for Bill {
    fn from(row: BillRow) -> Self {
        Self {
            id: row.id,
            currency: row.currency,
            status: BillStatus::from_str(&row.status).unwrap_or(BillStatus::Pending),
            total_amount_cents: row.total_amount_cents,
            start_time: row.start_time,
            end_time: row.end_time,
            close_reason: row.close_reason,
            error_message: row.error_message,
            billed_at: row.billed_at,
            idempotency_key: row.idempotency_key,
            workflow_id: row.workflow_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        let allowed = status_strings(&[BillStatus::Pending, BillStatus::Active]);
        assert_eq!(allowed, vec!["pending".to_string(), "active".to_string()]);
    }

    #[test]
    fn test_bill_row_conversion() {
        let now = Utc::now();
        let row = BillRow {
            id: 7,
            currency: "USD".to_string(),
            status: "closing".to_string(),
            total_amount_cents: 3500,
            start_time: now,
            end_time: now,
            close_reason: Some("eom".to_string()),
            error_message: None,
            billed_at: None,
            idempotency_key: "k1".to_string(),
            workflow_id: "bill-k1".to_string(),
            created_at: now,
            updated_at: now,
        };

        let bill: Bill = row.into();
        assert_eq!(bill.id, 7);
        assert_eq!(bill.status, BillStatus::Closing);
        assert_eq!(bill.close_reason.as_deref(), Some("eom"));
    }
}
