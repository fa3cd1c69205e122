//! API layer for the Tally billing service
//!
//! HTTP handlers, request/response DTOs, the idempotency gate, and the
//! supervised background task pool for workflow signal dispatch.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    missing_docs
)]

pub mod dto;
pub mod handlers;
pub mod idempotency;
pub mod tasks;

// Re-export the pieces main.rs wires together
pub use handlers::configure_bills;
pub use idempotency::{IdempotencyGate, IdempotencyKey};
pub use tasks::TaskPool;
