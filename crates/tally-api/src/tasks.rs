//! Supervised background task pool
//!
//! Handlers hand off workflow signal dispatch and termination here and
//! return immediately. Tasks run with bounded concurrency and a per-task
//! timeout; failures are logged and counted, never escalated to the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_core::AppResult;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Counters for operational visibility
#[derive(Clone, Default)]
pub struct TaskCounters {
    /// Tasks handed to the pool
    pub spawned: Arc<AtomicU64>,
    /// Tasks that completed successfully
    pub succeeded: Arc<AtomicU64>,
    /// Tasks that returned an error
    pub failed: Arc<AtomicU64>,
    /// Tasks cut off by the per-task timeout
    pub timed_out: Arc<AtomicU64>,
}

/// Background task pool with bounded concurrency and per-task timeout
#[derive(Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    counters: TaskCounters,
}

impl TaskPool {
    /// Create a pool allowing `max_in_flight` concurrent tasks, each bounded
    /// by `timeout`
    pub fn new(max_in_flight: usize, timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            timeout,
            counters: TaskCounters::default(),
        }
    }

    /// Run a fire-and-forget operation on the pool.
    ///
    /// The caller is never blocked; the operation waits for a concurrency
    /// slot, then runs under the pool's timeout. Outcomes are logged with
    /// the operation name and counted.
    pub fn spawn<F>(&self, op: &'static str, fut: F)
    where
        F: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let timeout = self.timeout;
        let counters = self.counters.clone();

        counters.spawned.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // pool shut down
            };

            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(())) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(op, "Background task succeeded");
                }
                Ok(Err(err)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(op, error = %err, "Background task failed");
                }
                Err(_) => {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    error!(
                        op,
                        timeout_ms = timeout.as_millis() as u64,
                        "Background task timed out"
                    );
                }
            }
        });
    }

    /// The pool's counters
    pub fn counters(&self) -> &TaskCounters {
        &self.counters
    }
}
