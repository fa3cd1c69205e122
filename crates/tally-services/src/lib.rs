//! Tally business services
//!
//! This crate holds the coordination core of the billing service:
//!
//! - `BillStateMachine`: the only code path that mutates bills, built on
//!   per-bill row locks inside database transactions
//! - `BillingService`: the business layer driving the state machine
//! - `CurrencyService`: exchange-rate lookups and amount conversion

pub mod billing;
pub mod currency;
pub mod state_machine;

pub use billing::{BillingService, CreatedLineItem, LineItemParams};
pub use currency::CurrencyService;
pub use state_machine::{BillStateMachine, BillTx};
