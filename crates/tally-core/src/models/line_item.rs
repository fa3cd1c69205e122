//! Line item model
//!
//! An immutable charge recorded against a bill. Amounts are stored in the
//! bill's currency after conversion; the original submission is preserved in
//! the conversion metadata.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Line item entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Unique identifier
    pub id: i32,

    /// Owning bill
    pub bill_id: i32,

    /// Amount in the bill's currency
    pub amount_cents: i64,

    /// Currency the amount is stored in (the bill's currency)
    pub currency: String,

    /// Human-readable description of the charge
    pub description: String,

    /// External reference for the charge
    pub reference_id: String,

    /// When the charge was incurred
    pub incurred_at: DateTime<Utc>,

    /// Conversion details when the submitted currency differed from the bill's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ConversionMetadata>,

    /// Client-supplied idempotency key, unique per (bill, key)
    pub idempotency_key: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Record of a currency conversion applied on submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    /// Amount as originally submitted
    pub original_amount_cents: i64,

    /// Currency as originally submitted
    pub original_currency: String,

    /// Rate applied: stored amount = original amount × exchange rate
    pub exchange_rate: Decimal,
}

/// Parameters for inserting a line item
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub bill_id: i32,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub reference_id: String,
    pub incurred_at: DateTime<Utc>,
    pub metadata: Option<ConversionMetadata>,
    pub idempotency_key: String,
}
