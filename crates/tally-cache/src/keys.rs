//! Cache key constants and builders
//!
//! Standardized key naming for cached entries, preventing collisions
//! between key families.
//!
//! # Key Patterns
//!
//! - `idem:{resource}:{key}` - Idempotency entries per (resource path, client key)

/// Prefix for idempotency entries
///
/// Format: `idem:{resource}:{key}`
pub const IDEMPOTENCY_PREFIX: &str = "idem";

/// TTL for idempotency entries (24 hours)
pub const IDEMPOTENCY_TTL_SECS: u64 = 86_400;

/// Build a cache key for an idempotency entry.
///
/// `resource` is the request path the key applies to, so the same client
/// key on different endpoints never collides.
pub fn idempotency_key(resource: &str, client_key: &str) -> String {
    format!("{}:{}:{}", IDEMPOTENCY_PREFIX, resource, client_key)
}
