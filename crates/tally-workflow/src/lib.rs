//! Tally billing-period workflow runtime
//!
//! A per-bill long-running workflow owns each bill's lifecycle timeline:
//! wait for the period to start, activate the bill, react to signals while
//! the period is open, and close the bill when the period ends. Workflow
//! instances are persisted as `workflow_runs` rows so a process restart
//! resumes every running instance with its remaining timers.
//!
//! Effects run through `Activities`, thin idempotent wrappers over the
//! business layer with per-activity retry policies.

pub mod activities;
pub mod billing_period;
pub mod retry;
pub mod runtime;
pub mod signals;

pub use activities::Activities;
pub use billing_period::{billing_period, BillingPeriodParams};
pub use retry::RetryPolicy;
pub use runtime::WorkflowRuntime;
pub use signals::{AddLineItemSignal, CloseBillSignal, Signal};
