//! Workflow signals
//!
//! Asynchronous messages delivered to a running billing-period workflow.
//! Signals sent before the workflow reaches its active select loop are
//! buffered by the instance's channel and consumed once the loop runs.

use serde::{Deserialize, Serialize};

/// Signal name for line item additions
pub const ADD_LINE_ITEM_SIGNAL: &str = "add-line-item";

/// Signal name for manual bill closure
pub const CLOSE_BILL_SIGNAL: &str = "close-bill";

/// Notifies the workflow that a line item was committed, so it refreshes
/// the bill's materialized total. The activity queries the database for the
/// authoritative amounts; the signal only carries the trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLineItemSignal {
    pub line_item_id: i32,
}

/// Requests manual closure of the bill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseBillSignal {
    pub reason: String,
    pub closed_by: String,
}

/// A signal envelope delivered to a workflow instance
#[derive(Debug, Clone)]
pub enum Signal {
    AddLineItem(AddLineItemSignal),
    CloseBill(CloseBillSignal),
}

impl Signal {
    /// The wire name of this signal
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddLineItem(_) => ADD_LINE_ITEM_SIGNAL,
            Self::CloseBill(_) => CLOSE_BILL_SIGNAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        let signal = Signal::AddLineItem(AddLineItemSignal { line_item_id: 1 });
        assert_eq!(signal.name(), "add-line-item");

        let signal = Signal::CloseBill(CloseBillSignal {
            reason: "eom".to_string(),
            closed_by: "ops".to_string(),
        });
        assert_eq!(signal.name(), "close-bill");
    }

    #[test]
    fn test_signal_payload_serialization() {
        let json = serde_json::to_value(AddLineItemSignal { line_item_id: 42 }).unwrap();
        assert_eq!(json["line_item_id"], 42);

        let signal: CloseBillSignal =
            serde_json::from_str(r#"{"reason":"manual","closed_by":"admin"}"#).unwrap();
        assert_eq!(signal.reason, "manual");
        assert_eq!(signal.closed_by, "admin");
    }
}
