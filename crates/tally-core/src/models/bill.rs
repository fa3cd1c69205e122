//! Bill model
//!
//! A bill is a time-bounded container of monetary line items in a single
//! currency. Its lifecycle is owned by the billing-period workflow and all
//! mutations after creation go through the bill state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bill lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    /// Created, billing period not yet started
    Pending,
    /// Billing period open, line items accepted
    Active,
    /// Close in progress, totals being finalized
    Closing,
    /// Terminal: period finished, totals final
    Closed,
    /// Terminal: operator intervention required
    AttentionRequired,
}

impl BillStatus {
    /// Database string value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::AttentionRequired => "attention_required",
        }
    }

    /// Parse from a database string value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "closing" => Some(Self::Closing),
            "closed" => Some(Self::Closed),
            "attention_required" => Some(Self::AttentionRequired),
            _ => None,
        }
    }

    /// Whether no further transitions are allowed from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::AttentionRequired)
    }

    /// Whether `next` is a legal transition from this status.
    ///
    /// Legal transitions: pending → active, pending → closed (early close),
    /// active → closing, closing → closed, and any non-terminal status →
    /// attention_required.
    pub fn can_transition_to(&self, next: BillStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Active) => true,
            (Self::Pending, Self::Closed) => true,
            (Self::Active, Self::Closing) => true,
            (Self::Closing, Self::Closed) => true,
            (from, Self::AttentionRequired) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for BillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bill entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    /// Unique identifier
    pub id: i32,

    /// Three-letter ISO currency code all amounts are stored in
    pub currency: String,

    /// Lifecycle status
    pub status: BillStatus,

    /// Materialized sum of line item amounts, in the bill's currency
    pub total_amount_cents: i64,

    /// Start of the billing period (inclusive)
    pub start_time: DateTime<Utc>,

    /// End of the billing period (exclusive)
    pub end_time: DateTime<Utc>,

    /// Why the bill was closed (auto_close, manual reason, invalid_period)
    pub close_reason: Option<String>,

    /// Failure detail when status is attention_required
    pub error_message: Option<String>,

    /// When the bill reached closed status
    pub billed_at: Option<DateTime<Utc>>,

    /// Client-supplied idempotency key, unique per bill
    pub idempotency_key: String,

    /// Identifier of the billing-period workflow owning this bill
    pub workflow_id: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    /// Derive the workflow identifier for a bill from its idempotency key.
    ///
    /// Deterministic so that duplicate workflow starts collapse into one
    /// instance per bill.
    pub fn workflow_id_for(idempotency_key: &str) -> String {
        format!("bill-{}", idempotency_key)
    }
}

/// Parameters for creating a bill
#[derive(Debug, Clone)]
pub struct NewBill {
    pub currency: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub idempotency_key: String,
    pub workflow_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            BillStatus::Pending,
            BillStatus::Active,
            BillStatus::Closing,
            BillStatus::Closed,
            BillStatus::AttentionRequired,
        ] {
            assert_eq!(BillStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(BillStatus::from_str("failed"), None);
    }

    #[test]
    fn test_legal_transitions() {
        use BillStatus::*;

        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Closed));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));

        assert!(Pending.can_transition_to(AttentionRequired));
        assert!(Active.can_transition_to(AttentionRequired));
        assert!(Closing.can_transition_to(AttentionRequired));
    }

    #[test]
    fn test_illegal_transitions() {
        use BillStatus::*;

        assert!(!Active.can_transition_to(Pending));
        assert!(!Active.can_transition_to(Closed));
        assert!(!Pending.can_transition_to(Closing));
        assert!(!Closing.can_transition_to(Active));

        // Terminal states admit nothing, including attention_required
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(AttentionRequired));
        assert!(!AttentionRequired.can_transition_to(Closed));
        assert!(!AttentionRequired.can_transition_to(AttentionRequired));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BillStatus::Closed.is_terminal());
        assert!(BillStatus::AttentionRequired.is_terminal());
        assert!(!BillStatus::Pending.is_terminal());
        assert!(!BillStatus::Active.is_terminal());
        assert!(!BillStatus::Closing.is_terminal());
    }

    #[test]
    fn test_workflow_id_derivation() {
        assert_eq!(Bill::workflow_id_for("abc-123"), "bill-abc-123");
    }
}
