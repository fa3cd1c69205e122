//! Tally Billing Service
//!
//! Billing period service: bills are time-bounded containers of line items
//! whose lifecycle is owned by a durable per-bill workflow. This binary
//! wires the database, cache, state machine, workflow runtime, and HTTP API
//! together.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tally_api::{configure_bills, IdempotencyGate, TaskPool};
use tally_cache::RedisCache;
use tally_core::{traits::BillingOps, AppConfig};
use tally_db::{
    create_pool, PgBillRepository, PgCurrencyRepository, PgLineItemRepository,
    PgWorkflowRunRepository,
};
use tally_services::{BillStateMachine, BillingService, CurrencyService};
use tally_workflow::{Activities, WorkflowRuntime};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Health check endpoint
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "tally-billing",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tally_billing={},tally_api={},tally_services={},tally_workflow={},tally_db={},actix_web=info,sqlx=warn",
            log_level, log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!(
        "Starting Tally Billing Service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = AppConfig::load().expect("Failed to load configuration");

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, Some(config.database.max_connections))
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("Database migrations applied");

    let cache = Arc::new(
        RedisCache::new(&config.redis.url)
            .await
            .expect("Failed to connect to Redis"),
    );
    cache.ping().await.expect("Redis health check failed");

    // Repositories and services
    let bills = Arc::new(PgBillRepository::new(pool.clone()));
    let line_items = Arc::new(PgLineItemRepository::new(pool.clone()));
    let currencies = CurrencyService::new(Arc::new(PgCurrencyRepository::new(pool.clone())));
    let state_machine = BillStateMachine::new(pool.clone());
    let billing = Arc::new(BillingService::new(
        state_machine,
        bills,
        line_items,
        currencies,
    ));

    // Workflow runtime with injected activity dependencies
    let activities = Arc::new(Activities::new(billing.clone() as Arc<dyn BillingOps>));
    let workflow_runs = Arc::new(PgWorkflowRunRepository::new(pool.clone()));
    let runtime = WorkflowRuntime::new(activities, workflow_runs, &config.workflow);

    let resumed = runtime
        .resume_pending()
        .await
        .expect("Failed to resume billing period workflows");
    info!("Workflow runtime ready ({} instances resumed)", resumed);

    let gate = IdempotencyGate::new(cache.clone(), config.redis.idempotency_ttl_secs);
    let tasks = TaskPool::new(
        config.workflow.dispatch_concurrency,
        Duration::from_secs(config.workflow.dispatch_timeout_secs),
    );

    // CORS configuration
    let cors_origins = env::var("CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

    let bind_addr = config.server_addr();
    let workers = config.server.workers;
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let billing_data = web::Data::from(billing);
    let runtime_data = web::Data::new(runtime.clone());
    let gate_data = web::Data::new(gate);
    let tasks_data = web::Data::new(tasks);

    HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origins: Vec<&str> = cors_origins_inner.split(',').collect();
                if let Ok(origin_str) = origin.to_str() {
                    origins.iter().any(|o| o.trim() == origin_str)
                } else {
                    false
                }
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                header::ACCEPT,
                header::CONTENT_TYPE,
                header::HeaderName::from_static("x-idempotency-key"),
            ])
            .max_age(3600);

        App::new()
            .app_data(billing_data.clone())
            .app_data(runtime_data.clone())
            .app_data(gate_data.clone())
            .app_data(tasks_data.clone())
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(middleware::Compress::default())
            .wrap(middleware::NormalizePath::trim())
            .route("/health", web::get().to(health_check))
            .configure(configure_bills)
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await
}
