//! Line item repository implementation
//!
//! Reads are pool-backed; the insert is a connection-level operation because
//! line items may only be created inside the parent bill's locked
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tally_core::{
    models::{ConversionMetadata, LineItem, NewLineItem},
    traits::LineItemRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument, warn};

use super::bill_repo::is_unique_violation;

const LINE_ITEM_COLUMNS: &str = r#"
    id, bill_id, amount_cents, currency, description, reference_id,
    incurred_at, metadata, idempotency_key, created_at, updated_at
"#;

/// PostgreSQL implementation of LineItemRepository
pub struct PgLineItemRepository {
    pool: PgPool,
}

impl PgLineItemRepository {
    /// Create a new line item repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LineItemRepository for PgLineItemRepository {
    #[instrument(skip(self))]
    async fn find_by_bill(&self, bill_id: i32) -> AppResult<Vec<LineItem>> {
        debug!("Listing line items for bill {}", bill_id);

        let rows = sqlx::query_as::<sqlx::Postgres, LineItemRow>(&format!(
            r#"
            SELECT {LINE_ITEM_COLUMNS}
            FROM line_items
            WHERE bill_id = $1
            ORDER BY incurred_at ASC, id ASC
            "#
        ))
        .bind(bill_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing line items for bill {}: {}", bill_id, e);
            AppError::Database(format!("Failed to list line items: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Insert a line item inside the caller's transaction.
///
/// A duplicate `(bill_id, idempotency_key)` yields `AlreadyExists`.
pub async fn create_line_item(
    conn: &mut PgConnection,
    params: &NewLineItem,
) -> AppResult<LineItem> {
    let metadata = params
        .metadata
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| AppError::Serialization(format!("Failed to encode metadata: {}", e)))?;

    let row = sqlx::query_as::<sqlx::Postgres, LineItemRow>(&format!(
        r#"
        INSERT INTO line_items (
            bill_id, amount_cents, currency, description, reference_id,
            incurred_at, metadata, idempotency_key
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {LINE_ITEM_COLUMNS}
        "#
    ))
    .bind(params.bill_id)
    .bind(params.amount_cents)
    .bind(&params.currency)
    .bind(&params.description)
    .bind(&params.reference_id)
    .bind(params.incurred_at)
    .bind(metadata)
    .bind(&params.idempotency_key)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            return AppError::AlreadyExists(format!(
                "a line item with idempotency key {} already exists on bill {}",
                params.idempotency_key, params.bill_id
            ));
        }
        error!("Database error creating line item: {}", e);
        AppError::Database(format!("Failed to create line item: {}", e))
    })?;

    Ok(row.into())
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct LineItemRow {
    id: i32,
    bill_id: i32,
    amount_cents: i64,
    currency: String,
    description: String,
    reference_id: String,
    incurred_at: DateTime<Utc>,
    metadata: Option<serde_json::Value>,
    idempotency_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LineItemRow> for LineItem {
    fn from(row: LineItemRow) -> Self {
        let metadata = row.metadata.and_then(|value| {
            serde_json::from_value::<ConversionMetadata>(value)
                .map_err(|e| {
                    warn!("Ignoring malformed metadata on line item {}: {}", row.id, e);
                })
                .ok()
        });

        Self {
            id: row.id,
            bill_id: row.bill_id,
            amount_cents: row.amount_cents,
            currency: row.currency,
            description: row.description,
            reference_id: row.reference_id,
            incurred_at: row.incurred_at,
            metadata,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
