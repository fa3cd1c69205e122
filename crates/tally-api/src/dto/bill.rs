//! Bill-related DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::models::{Bill, BillStatus, LineItem};
use tally_core::AppError;
use validator::{Validate, ValidationError};

use super::line_item::LineItemDto;

/// Validate a three-letter alphabetic currency code
pub(crate) fn validate_currency_code(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency_code");
        err.message = Some("currency must be a 3-letter alphabetic code".into());
        Err(err)
    }
}

/// Request body for `POST /v1/bills`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBillRequest {
    /// Bill currency; must be a 3-letter code of an enabled currency
    #[validate(custom(function = validate_currency_code))]
    pub currency: String,

    /// Period start; defaults to now when omitted
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// Period end; must be after the start
    pub end_time: DateTime<Utc>,
}

impl CreateBillRequest {
    /// Resolve the effective billing period.
    ///
    /// An omitted start means "now". An explicit start must not be in the
    /// past, and the end must lie after both now and the start.
    pub fn resolve_period(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
        let now = Utc::now();

        if let Some(start) = self.start_time {
            if start < now {
                return Err(AppError::InvalidArgument(
                    "start_time must be in the future".to_string(),
                ));
            }
        }

        if self.end_time <= now {
            return Err(AppError::InvalidArgument(
                "end_time must be in the future".to_string(),
            ));
        }

        let start = self.start_time.unwrap_or(now);
        if self.end_time <= start {
            return Err(AppError::InvalidArgument(
                "end_time must be after start_time".to_string(),
            ));
        }

        Ok((start, self.end_time))
    }
}

/// Request body for `POST /v1/bills/{id}/close`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CloseBillRequest {
    /// Why the bill is being closed
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

/// Query parameters for `GET /v1/bills`
#[derive(Debug, Clone, Deserialize)]
pub struct ListBillsQuery {
    /// Page size (default 10, capped at 100)
    pub limit: Option<i64>,

    /// Page offset
    pub offset: Option<i64>,
}

/// Bill representation in API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillDto {
    /// Bill ID
    pub id: i32,

    /// Bill currency
    pub currency: String,

    /// Lifecycle status
    pub status: BillStatus,

    /// Materialized total in the bill's currency
    pub total_amount_cents: i64,

    /// Period start
    pub start_time: DateTime<Utc>,

    /// Period end
    pub end_time: DateTime<Utc>,

    /// Close reason, once closed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,

    /// Failure detail, when attention is required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// When the bill was closed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billed_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Line items, present on single-bill responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_items: Option<Vec<LineItemDto>>,
}

impl BillDto {
    /// Build a DTO without line items (listing responses)
    pub fn from_bill(bill: Bill) -> Self {
        Self {
            id: bill.id,
            currency: bill.currency,
            status: bill.status,
            total_amount_cents: bill.total_amount_cents,
            start_time: bill.start_time,
            end_time: bill.end_time,
            close_reason: bill.close_reason,
            error_message: bill.error_message,
            billed_at: bill.billed_at,
            created_at: bill.created_at,
            updated_at: bill.updated_at,
            line_items: None,
        }
    }

    /// Build a DTO embedding the bill's line items
    pub fn with_line_items(bill: Bill, line_items: Vec<LineItem>) -> Self {
        let mut dto = Self::from_bill(bill);
        dto.line_items = Some(line_items.into_iter().map(LineItemDto::from).collect());
        dto
    }
}

/// Response envelope carrying a single bill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillResponse {
    /// The bill
    pub bill: BillDto,
}

/// Response envelope for `GET /v1/bills`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBillsResponse {
    /// Page of bills
    pub bills: Vec<BillDto>,

    /// Total number of bills
    pub total_count: i64,

    /// Applied page size
    pub limit: i64,

    /// Applied offset
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_currency_code_validation() {
        assert!(validate_currency_code("USD").is_ok());
        assert!(validate_currency_code("gel").is_ok());
        assert!(validate_currency_code("US").is_err());
        assert!(validate_currency_code("USDT").is_err());
        assert!(validate_currency_code("U5D").is_err());
        assert!(validate_currency_code("").is_err());
    }

    #[test]
    fn test_resolve_period_defaults_start_to_now() {
        let request = CreateBillRequest {
            currency: "USD".to_string(),
            start_time: None,
            end_time: Utc::now() + Duration::hours(1),
        };

        let (start, end) = request.resolve_period().unwrap();
        assert!(start <= Utc::now());
        assert_eq!(end, request.end_time);
    }

    #[test]
    fn test_resolve_period_rejects_past_start() {
        let request = CreateBillRequest {
            currency: "USD".to_string(),
            start_time: Some(Utc::now() - Duration::hours(1)),
            end_time: Utc::now() + Duration::hours(1),
        };

        assert!(matches!(
            request.resolve_period(),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolve_period_rejects_inverted_period() {
        let request = CreateBillRequest {
            currency: "USD".to_string(),
            start_time: Some(Utc::now() + Duration::hours(2)),
            end_time: Utc::now() + Duration::hours(1),
        };

        assert!(matches!(
            request.resolve_period(),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolve_period_rejects_past_end() {
        let request = CreateBillRequest {
            currency: "USD".to_string(),
            start_time: None,
            end_time: Utc::now() - Duration::minutes(1),
        };

        assert!(matches!(
            request.resolve_period(),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_close_request_validation() {
        let request = CloseBillRequest {
            reason: "eom".to_string(),
        };
        assert!(request.validate().is_ok());

        let request = CloseBillRequest {
            reason: String::new(),
        };
        assert!(request.validate().is_err());

        let request = CloseBillRequest {
            reason: "x".repeat(256),
        };
        assert!(request.validate().is_err());
    }
}
