//! Currency repository implementation
//!
//! Read-only lookups against the currencies reference table.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tally_core::{models::Currency, traits::CurrencyRepository, AppError, AppResult};
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of CurrencyRepository
pub struct PgCurrencyRepository {
    pool: PgPool,
}

impl PgCurrencyRepository {
    /// Create a new currency repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CurrencyRepository for PgCurrencyRepository {
    #[instrument(skip(self))]
    async fn find_by_code(&self, code: &str) -> AppResult<Option<Currency>> {
        debug!("Finding currency by code: {}", code);

        let result = sqlx::query_as::<sqlx::Postgres, CurrencyRow>(
            r#"
            SELECT id, code, symbol, rate, enabled
            FROM currencies
            WHERE code = $1 AND enabled = TRUE
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding currency {}: {}", code, e);
            AppError::Database(format!("Failed to find currency: {}", e))
        })?;

        Ok(result.map(Into::into))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct CurrencyRow {
    id: i32,
    code: String,
    symbol: Option<String>,
    rate: Decimal,
    enabled: bool,
}

impl From<CurrencyRow> for Currency {
    fn from(row: CurrencyRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            symbol: row.symbol,
            rate: row.rate,
            enabled: row.enabled,
        }
    }
}
