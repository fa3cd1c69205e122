//! Tally Database Layer
//!
//! This crate provides PostgreSQL database access and repository
//! implementations for the Tally billing service. It includes:
//!
//! - Connection pool management with sqlx
//! - Repository implementations for bills, line items, currencies, and
//!   workflow runs
//! - Connection-level operations for use inside the bill state machine's
//!   locked transactions

pub mod pool;
pub mod repositories;

pub use pool::create_pool;
pub use repositories::*;

// Re-export commonly used types
pub use sqlx::{PgConnection, PgPool, Postgres, Transaction};
pub use tally_core::{AppError, AppResult};
