//! Line-item-related DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::models::{ConversionMetadata, LineItem};
use validator::Validate;

use super::bill::validate_currency_code;

/// Request body for `POST /v1/bills/{id}/line_items`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateLineItemRequest {
    /// Currency the amount is submitted in; converted to the bill's currency
    #[validate(custom(function = validate_currency_code))]
    pub currency: String,

    /// Amount in cents of the submitted currency
    #[validate(range(min = 1))]
    pub amount_cents: i64,

    /// Description of the charge
    #[validate(length(min = 1, max = 255))]
    pub description: String,

    /// External reference for the charge
    #[validate(length(min = 1, max = 100))]
    pub reference_id: String,
}

/// Line item representation in API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemDto {
    /// Line item ID
    pub id: i32,

    /// Owning bill
    pub bill_id: i32,

    /// Amount in the bill's currency
    pub amount_cents: i64,

    /// Currency the amount is stored in
    pub currency: String,

    /// Description of the charge
    pub description: String,

    /// External reference for the charge
    pub reference_id: String,

    /// When the charge was incurred
    pub incurred_at: DateTime<Utc>,

    /// Conversion details when the submitted currency differed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ConversionMetadata>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<LineItem> for LineItemDto {
    fn from(item: LineItem) -> Self {
        Self {
            id: item.id,
            bill_id: item.bill_id,
            amount_cents: item.amount_cents,
            currency: item.currency,
            description: item.description,
            reference_id: item.reference_id,
            incurred_at: item.incurred_at,
            metadata: item.metadata,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

/// Response envelope carrying a single line item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemResponse {
    /// The line item
    pub line_item: LineItemDto,
}
