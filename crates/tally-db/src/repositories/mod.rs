//! Repository implementations
//!
//! This module contains concrete implementations of the repository traits
//! defined in tally-core, using sqlx for PostgreSQL access, plus the
//! connection-level operations the bill state machine runs inside its
//! locked transactions.

pub mod bill_repo;
pub mod currency_repo;
pub mod line_item_repo;
pub mod workflow_run_repo;

pub use bill_repo::PgBillRepository;
pub use currency_repo::PgCurrencyRepository;
pub use line_item_repo::PgLineItemRepository;
pub use workflow_run_repo::PgWorkflowRunRepository;
