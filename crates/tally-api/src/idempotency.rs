//! Request idempotency gate
//!
//! Deduplicates mutating requests by `(resource path, client key)`. The
//! first request claims the key with a `processing` marker, executes the
//! business call, and stores the response for replay; duplicates either see
//! the stored response, an `Aborted` while the original is in flight, or an
//! `InvalidArgument` when the same key arrives with a different body.
//!
//! The gate sits strictly above the business layer and never holds a
//! database transaction.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use async_trait::async_trait;
use futures::future::{ready, Ready};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tally_cache::keys;
use tally_core::{
    models::{IdempotencyEntry, IdempotencyStatus},
    traits::CacheService,
    AppError, AppResult,
};
use tracing::{debug, warn};

/// Header carrying the client's idempotency key
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Extractor for the `X-Idempotency-Key` header.
///
/// Rejects the request with `InvalidArgument` when the header is missing or
/// blank.
#[derive(Debug, Clone)]
pub struct IdempotencyKey(pub String);

impl FromRequest for IdempotencyKey {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let value = req
            .headers()
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match value {
            Some(key) => ready(Ok(Self(key.to_string()))),
            None => {
                debug!("Rejecting request without idempotency key");
                ready(Err(AppError::InvalidArgument(format!(
                    "{} header is required",
                    IDEMPOTENCY_HEADER
                ))
                .into()))
            }
        }
    }
}

/// Object-safe view of the cache for idempotency entries, so the gate can
/// hold any `CacheService` behind one type.
#[async_trait]
trait EntryStore: Send + Sync {
    async fn get_entry(&self, key: &str) -> AppResult<Option<IdempotencyEntry>>;
    async fn put_entry(&self, key: &str, entry: &IdempotencyEntry, ttl_secs: u64)
        -> AppResult<()>;
    async fn claim_entry(
        &self,
        key: &str,
        entry: &IdempotencyEntry,
        ttl_secs: u64,
    ) -> AppResult<bool>;
    async fn delete_entry(&self, key: &str) -> AppResult<bool>;
}

#[async_trait]
impl<C: CacheService> EntryStore for C {
    async fn get_entry(&self, key: &str) -> AppResult<Option<IdempotencyEntry>> {
        self.get::<IdempotencyEntry>(key).await
    }

    async fn put_entry(
        &self,
        key: &str,
        entry: &IdempotencyEntry,
        ttl_secs: u64,
    ) -> AppResult<()> {
        self.set(key, entry, ttl_secs).await
    }

    async fn claim_entry(
        &self,
        key: &str,
        entry: &IdempotencyEntry,
        ttl_secs: u64,
    ) -> AppResult<bool> {
        self.set_nx(key, entry, ttl_secs).await
    }

    async fn delete_entry(&self, key: &str) -> AppResult<bool> {
        self.delete(key).await
    }
}

/// Idempotency gate wrapping mutating business calls
#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn EntryStore>,
    ttl_secs: u64,
}

impl IdempotencyGate {
    /// Create a gate over a cache, with the given entry TTL
    pub fn new<C: CacheService + 'static>(cache: Arc<C>, ttl_secs: u64) -> Self {
        Self {
            store: cache,
            ttl_secs,
        }
    }

    /// Stable hash of a request body
    fn hash_body(body: &[u8]) -> String {
        let digest = Sha256::digest(body);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Run a mutating request under the idempotency protocol.
    ///
    /// `resource` is the request path and `key` the client's idempotency
    /// key; together they identify the cache entry. `op` is the business
    /// call, executed at most once per (resource, key) while the entry
    /// lives.
    pub async fn execute<T, F, Fut>(
        &self,
        resource: &str,
        key: &str,
        body: &[u8],
        op: F,
    ) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let cache_key = keys::idempotency_key(resource, key);
        let body_hash = Self::hash_body(body);

        if let Some(entry) = self.store.get_entry(&cache_key).await? {
            return self.replay(&cache_key, entry, &body_hash);
        }

        let claimed = self
            .store
            .claim_entry(&cache_key, &IdempotencyEntry::processing(), self.ttl_secs)
            .await?;
        if !claimed {
            // Lost the race to a concurrent request with the same key
            return Err(AppError::Aborted(
                "a request with this idempotency key is already being processed".to_string(),
            ));
        }

        match op().await {
            Ok(value) => {
                match serde_json::to_value(&value) {
                    Ok(payload) => {
                        let entry = IdempotencyEntry::completed(body_hash, payload);
                        if let Err(err) =
                            self.store.put_entry(&cache_key, &entry, self.ttl_secs).await
                        {
                            // The response is still returned; a duplicate
                            // retry will re-execute instead of replaying
                            warn!(
                                cache_key,
                                error = %err,
                                "Failed to store idempotency entry"
                            );
                        }
                    }
                    Err(err) => {
                        warn!(cache_key, error = %err, "Failed to encode response for replay");
                    }
                }
                Ok(value)
            }
            Err(err) => {
                // Free the key so the client may retry
                if let Err(delete_err) = self.store.delete_entry(&cache_key).await {
                    warn!(
                        cache_key,
                        error = %delete_err,
                        "Failed to clear processing marker"
                    );
                }
                Err(err)
            }
        }
    }

    fn replay<T: DeserializeOwned>(
        &self,
        cache_key: &str,
        entry: IdempotencyEntry,
        body_hash: &str,
    ) -> AppResult<T> {
        match entry.status {
            IdempotencyStatus::Processing => Err(AppError::Aborted(
                "a request with this idempotency key is already being processed".to_string(),
            )),
            IdempotencyStatus::Completed => {
                if let Some(stored_hash) = &entry.request_body_hash {
                    if stored_hash != body_hash {
                        return Err(AppError::InvalidArgument(
                            "idempotency key conflict: request body does not match the original request"
                                .to_string(),
                        ));
                    }
                }

                let payload = entry.response.ok_or_else(|| {
                    AppError::Internal(format!(
                        "idempotency entry {} has no stored response",
                        cache_key
                    ))
                })?;

                debug!(cache_key, "Replaying stored idempotent response");
                serde_json::from_value(payload).map_err(|e| {
                    AppError::Serialization(format!("Failed to decode stored response: {}", e))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryCache {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl CacheService for InMemoryCache {
        async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
            let entries = self.entries.lock().unwrap();
            entries
                .get(key)
                .map(|json| serde_json::from_str(json).map_err(AppError::from))
                .transpose()
        }

        async fn set<T: Serialize + Send + Sync>(
            &self,
            key: &str,
            value: &T,
            _ttl_secs: u64,
        ) -> AppResult<()> {
            let json = serde_json::to_string(value)?;
            self.entries.lock().unwrap().insert(key.to_string(), json);
            Ok(())
        }

        async fn set_nx<T: Serialize + Send + Sync>(
            &self,
            key: &str,
            value: &T,
            _ttl_secs: u64,
        ) -> AppResult<bool> {
            let json = serde_json::to_string(value)?;
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(key.to_string(), json);
            Ok(true)
        }

        async fn delete(&self, key: &str) -> AppResult<bool> {
            Ok(self.entries.lock().unwrap().remove(key).is_some())
        }

        async fn exists(&self, key: &str) -> AppResult<bool> {
            Ok(self.entries.lock().unwrap().contains_key(key))
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        value: i32,
    }

    fn gate() -> IdempotencyGate {
        IdempotencyGate::new(Arc::new(InMemoryCache::default()), 60)
    }

    #[tokio::test]
    async fn test_first_request_executes_and_second_replays() {
        let gate = gate();
        let executions = AtomicU32::new(0);

        let run = || {
            gate.execute("/v1/bills", "k1", b"{\"currency\":\"USD\"}", || {
                executions.fetch_add(1, Ordering::SeqCst);
                async { Ok(Payload { value: 7 }) }
            })
        };

        let first = run().await.unwrap();
        let second = run().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_key_different_body_is_conflict() {
        let gate = gate();

        gate.execute("/v1/bills", "k1", b"body-a", || async {
            Ok(Payload { value: 1 })
        })
        .await
        .unwrap();

        let result: AppResult<Payload> = gate
            .execute("/v1/bills", "k1", b"body-b", || async {
                Ok(Payload { value: 2 })
            })
            .await;

        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_processing_entry_aborts() {
        let cache = Arc::new(InMemoryCache::default());
        let gate = IdempotencyGate::new(cache.clone(), 60);

        // Simulate an in-flight request holding the key
        cache
            .set(
                &keys::idempotency_key("/v1/bills", "k1"),
                &IdempotencyEntry::processing(),
                60,
            )
            .await
            .unwrap();

        let result: AppResult<Payload> = gate
            .execute("/v1/bills", "k1", b"body", || async {
                Ok(Payload { value: 1 })
            })
            .await;

        assert!(matches!(result, Err(AppError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_failed_request_frees_the_key() {
        let gate = gate();
        let executions = AtomicU32::new(0);

        let result: AppResult<Payload> = gate
            .execute("/v1/bills", "k1", b"body", || {
                executions.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::Database("down".to_string())) }
            })
            .await;
        assert!(result.is_err());

        // The marker was cleared, so a retry executes again
        let retry = gate
            .execute("/v1/bills", "k1", b"body", || {
                executions.fetch_add(1, Ordering::SeqCst);
                async { Ok(Payload { value: 3 }) }
            })
            .await
            .unwrap();

        assert_eq!(retry.value, 3);
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_resource() {
        let gate = gate();

        let a = gate
            .execute("/v1/bills", "k1", b"body", || async {
                Ok(Payload { value: 1 })
            })
            .await
            .unwrap();
        let b = gate
            .execute("/v1/bills/1/close", "k1", b"body", || async {
                Ok(Payload { value: 2 })
            })
            .await
            .unwrap();

        assert_eq!(a.value, 1);
        assert_eq!(b.value, 2);
    }

    #[test]
    fn test_body_hash_is_stable() {
        let a = IdempotencyGate::hash_body(b"hello");
        let b = IdempotencyGate::hash_body(b"hello");
        let c = IdempotencyGate::hash_body(b"hello!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
