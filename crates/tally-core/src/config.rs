//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub workflow: WorkflowConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// TTL for idempotency entries in seconds
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,
}

fn default_idempotency_ttl() -> u64 {
    86_400 // 24 hours
}

/// Workflow runtime configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Logical task queue the runtime serves
    #[serde(default = "default_task_queue")]
    pub task_queue: String,

    /// Buffered signals per workflow instance
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,

    /// Timeout for background signal/terminate dispatch in seconds
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,

    /// Maximum in-flight background dispatch tasks
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,
}

fn default_task_queue() -> String {
    "billing-queue".to_string()
}

fn default_signal_buffer() -> usize {
    64
}

fn default_dispatch_timeout() -> u64 {
    5
}

fn default_dispatch_concurrency() -> usize {
    32
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 20)?
            .set_default("redis.idempotency_ttl_secs", 86_400)?
            .set_default("workflow.task_queue", "billing-queue")?
            .set_default("workflow.signal_buffer", 64)?
            .set_default("workflow.dispatch_timeout_secs", 5)?
            .set_default("workflow.dispatch_concurrency", 32)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with TALLY_ prefix
            .add_source(
                Environment::with_prefix("TALLY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            task_queue: default_task_queue(),
            signal_buffer: default_signal_buffer(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            dispatch_concurrency: default_dispatch_concurrency(),
        }
    }
}
