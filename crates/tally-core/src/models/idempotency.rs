//! Idempotency cache entries
//!
//! Dedup records for mutating API requests, keyed by (resource path, client
//! key) and stored with a short TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of an idempotency entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// The first request with this key is still in flight
    Processing,
    /// The request completed and its response is stored for replay
    Completed,
}

/// What is stored in the cache per (resource path, client key)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub status: IdempotencyStatus,

    /// Hash of the request body, set once the request completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body_hash: Option<String>,

    /// Response payload to replay for duplicate requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    /// Marker for a request that has just started processing
    pub fn processing() -> Self {
        let now = Utc::now();
        Self {
            status: IdempotencyStatus::Processing,
            request_body_hash: None,
            response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Entry for a completed request with its stored response
    pub fn completed(request_body_hash: String, response: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            status: IdempotencyStatus::Completed,
            request_body_hash: Some(request_body_hash),
            response: Some(response),
            created_at: now,
            updated_at: now,
        }
    }
}
