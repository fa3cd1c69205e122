//! Common traits for repositories and services
//!
//! Defines abstractions for database access, caching, and the business
//! operations invoked by workflow activities.

use crate::error::AppError;
use crate::models::{Bill, Currency, LineItem, NewBill, WorkflowRun, WorkflowRunStatus};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Bill repository trait
///
/// Lock-acquiring reads and in-transaction mutations are not part of this
/// trait; they run against the state machine's transaction and live in the
/// database crate as connection-level operations.
#[async_trait]
pub trait BillRepository: Send + Sync {
    /// Create a bill. A duplicate idempotency key yields `AlreadyExists`.
    async fn create(&self, params: &NewBill) -> Result<Bill, AppError>;

    /// Find a bill by ID
    async fn find_by_id(&self, id: i32) -> Result<Option<Bill>, AppError>;

    /// Page through bills, newest first, returning the page and total count
    async fn find_page(&self, limit: i64, offset: i64) -> Result<(Vec<Bill>, i64), AppError>;
}

/// Line item repository trait
///
/// Inserts happen inside the bill lock only, via the state machine's
/// transaction context; this trait covers reads.
#[async_trait]
pub trait LineItemRepository: Send + Sync {
    /// List line items for a bill, oldest first
    async fn find_by_bill(&self, bill_id: i32) -> Result<Vec<LineItem>, AppError>;
}

/// Currency repository trait
#[async_trait]
pub trait CurrencyRepository: Send + Sync {
    /// Find an enabled currency by code
    async fn find_by_code(&self, code: &str) -> Result<Option<Currency>, AppError>;
}

/// Workflow run repository trait
#[async_trait]
pub trait WorkflowRunRepository: Send + Sync {
    /// Record a workflow instance as running, creating or reviving the row
    async fn upsert_running(&self, run: &WorkflowRun) -> Result<(), AppError>;

    /// Update a run's status
    async fn set_status(
        &self,
        workflow_id: &str,
        status: WorkflowRunStatus,
    ) -> Result<(), AppError>;

    /// All runs that should be resumed after a restart
    async fn find_running(&self) -> Result<Vec<WorkflowRun>, AppError>;
}

/// Business operations invoked by workflow activities.
///
/// This is the seam between the orchestrator and the bill state machine:
/// activities depend on this trait, never on concrete business types, so
/// workflow tests can substitute a fake.
#[async_trait]
pub trait BillingOps: Send + Sync {
    /// Transition a bill to active. Calling this on an already-active bill
    /// succeeds, so activity retries are safe.
    async fn activate_bill(&self, bill_id: i32) -> Result<(), AppError>;

    /// Close a bill with the given reason. A no-op success when the bill is
    /// already closed.
    async fn close_bill(&self, bill_id: i32, reason: &str) -> Result<(), AppError>;

    /// Recompute the bill's materialized total from its line items
    async fn update_bill_total(&self, bill_id: i32) -> Result<(), AppError>;
}

/// Cache service trait
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Get value from cache
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError>;

    /// Set value in cache with TTL
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError>;

    /// Set value with TTL only if the key does not exist.
    ///
    /// Returns `true` when the value was stored, `false` when the key was
    /// already present.
    async fn set_nx<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<bool, AppError>;

    /// Delete value from cache
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool, AppError>;
}

/// Limit/offset paging parameters with service-wide bounds
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Default page size when the client sends none
    pub const DEFAULT_LIMIT: i64 = 10;

    /// Hard cap on page size
    pub const MAX_LIMIT: i64 = 100;

    /// Build a page request from raw client parameters, applying defaults
    /// and bounds.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l.min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        };
        Self {
            limit,
            offset: offset.unwrap_or(0).max(0),
        }
    }
}
