//! Domain models for the Tally billing service

pub mod bill;
pub mod currency;
pub mod idempotency;
pub mod line_item;
pub mod workflow_run;

pub use bill::{Bill, BillStatus, NewBill};
pub use currency::Currency;
pub use idempotency::{IdempotencyEntry, IdempotencyStatus};
pub use line_item::{ConversionMetadata, LineItem, NewLineItem};
pub use workflow_run::{WorkflowRun, WorkflowRunStatus};
