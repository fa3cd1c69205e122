//! Concurrency tests against a live database
//!
//! Exercise the bill lock's serialization guarantees: concurrent line-item
//! submission keeps the total consistent, close racing an insert never
//! strands a line item on a non-active bill, and close is idempotent.
//!
//! Run with a database:
//!
//! ```text
//! DATABASE_URL=postgresql://localhost/tally_billing cargo test -- --ignored
//! ```

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tally_core::{
    models::BillStatus,
    traits::{BillRepository, LineItemRepository},
    AppError,
};
use tally_db::{PgBillRepository, PgCurrencyRepository, PgLineItemRepository};
use tally_services::{BillStateMachine, BillingService, CurrencyService, LineItemParams};

/// Process-unique idempotency keys for test rows
fn unique_key(prefix: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, nanos, n)
}

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/tally_billing".to_string());
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("Failed to connect to test database")
}

fn service(pool: &PgPool) -> Arc<BillingService> {
    Arc::new(BillingService::new(
        BillStateMachine::new(pool.clone()),
        Arc::new(PgBillRepository::new(pool.clone())),
        Arc::new(PgLineItemRepository::new(pool.clone())),
        CurrencyService::new(Arc::new(PgCurrencyRepository::new(pool.clone()))),
    ))
}

async fn create_active_bill(pool: &PgPool, billing: &BillingService) -> i32 {
    let bill = billing
        .create_bill(
            "USD",
            Utc::now() + Duration::milliseconds(50),
            Utc::now() + Duration::hours(1),
            &unique_key("bill"),
        )
        .await
        .expect("Failed to create bill");

    sqlx::query("UPDATE bills SET status = 'active' WHERE id = $1")
        .bind(bill.id)
        .execute(pool)
        .await
        .expect("Failed to activate bill");

    bill.id
}

fn line_item(amount_cents: i64) -> LineItemParams {
    LineItemParams {
        currency: "USD".to_string(),
        amount_cents,
        description: "concurrent usage".to_string(),
        reference_id: "ref-conc".to_string(),
        idempotency_key: unique_key("li"),
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn test_concurrent_inserts_keep_total_consistent() {
    let pool = test_pool().await;
    let billing = service(&pool);
    let bill_id = create_active_bill(&pool, &billing).await;

    let mut handles = Vec::new();
    for i in 0..10i64 {
        let billing = billing.clone();
        handles.push(tokio::spawn(async move {
            billing.add_line_item(bill_id, line_item(100 * (i + 1))).await
        }));
    }

    let mut inserted = 0i64;
    let mut expected_total = 0i64;
    for handle in handles {
        if let Ok(created) = handle.await.unwrap() {
            inserted += 1;
            expected_total += created.line_item.amount_cents;
        }
    }
    assert_eq!(inserted, 10);

    let (bill, items) = billing.get_bill(bill_id).await.unwrap();
    assert_eq!(items.len(), 10);
    assert_eq!(bill.total_amount_cents, expected_total);
    assert_eq!(
        bill.total_amount_cents,
        items.iter().map(|i| i.amount_cents).sum::<i64>()
    );
}

#[tokio::test]
#[ignore] // Requires database
async fn test_duplicate_line_item_key_inserts_once() {
    let pool = test_pool().await;
    let billing = service(&pool);
    let bill_id = create_active_bill(&pool, &billing).await;

    let mut params = line_item(500);
    params.idempotency_key = unique_key("li-dup");

    billing
        .add_line_item(bill_id, params.clone())
        .await
        .unwrap();
    let second = billing.add_line_item(bill_id, params).await;
    assert!(matches!(second, Err(AppError::AlreadyExists(_))));

    let items = PgLineItemRepository::new(pool.clone())
        .find_by_bill(bill_id)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_concurrent_add_and_close_never_strands_line_items() {
    let pool = test_pool().await;
    let billing = service(&pool);
    let bill_id = create_active_bill(&pool, &billing).await;

    let adder = {
        let billing = billing.clone();
        tokio::spawn(async move {
            let mut results = Vec::new();
            for i in 0..5i64 {
                results.push(billing.add_line_item(bill_id, line_item(100 + i)).await);
            }
            results
        })
    };
    let closer = {
        let billing = billing.clone();
        tokio::spawn(async move { billing.close_bill(bill_id, "race").await })
    };

    let add_results = adder.await.unwrap();
    closer.await.unwrap().expect("close should succeed");

    let (bill, items) = billing.get_bill(bill_id).await.unwrap();
    assert_eq!(bill.status, BillStatus::Closed);

    // Every accepted insert happened while the bill was active, before
    // billed_at; every insert attempted after closure was rejected.
    let accepted = add_results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(items.len(), accepted);

    let billed_at = bill.billed_at.expect("closed bill has billed_at");
    for item in &items {
        assert!(item.created_at <= billed_at);
    }
    assert_eq!(
        bill.total_amount_cents,
        items.iter().map(|i| i.amount_cents).sum::<i64>()
    );
}

#[tokio::test]
#[ignore] // Requires database
async fn test_close_is_idempotent() {
    let pool = test_pool().await;
    let billing = service(&pool);
    let bill_id = create_active_bill(&pool, &billing).await;

    billing.add_line_item(bill_id, line_item(1000)).await.unwrap();

    let first = billing.close_bill(bill_id, "eom").await.unwrap();
    assert_eq!(first.status, BillStatus::Closed);
    assert_eq!(first.close_reason.as_deref(), Some("eom"));

    // A second close returns success without changing state
    let second = billing.close_bill(bill_id, "eom-again").await.unwrap();
    assert_eq!(second.status, BillStatus::Closed);
    assert_eq!(second.close_reason.as_deref(), Some("eom"));
    assert_eq!(second.billed_at, first.billed_at);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_attention_required_is_terminal() {
    let pool = test_pool().await;
    let billing = service(&pool);
    let bill_id = create_active_bill(&pool, &billing).await;

    let marked = billing
        .mark_attention_required(bill_id, "total refresh kept failing")
        .await
        .unwrap();
    assert_eq!(marked.status, BillStatus::AttentionRequired);
    assert_eq!(
        marked.error_message.as_deref(),
        Some("total refresh kept failing")
    );

    // Nothing moves a bill out of attention_required
    let close = billing.close_bill(bill_id, "eom").await;
    assert!(matches!(close, Err(AppError::FailedPrecondition(_))));

    let add = billing.add_line_item(bill_id, line_item(100)).await;
    assert!(matches!(add, Err(AppError::FailedPrecondition(_))));

    let again = billing
        .mark_attention_required(bill_id, "second failure")
        .await;
    assert!(matches!(again, Err(AppError::FailedPrecondition(_))));
}

#[tokio::test]
#[ignore] // Requires database
async fn test_line_item_rejected_on_pending_bill() {
    let pool = test_pool().await;
    let billing = service(&pool);

    let bill = billing
        .create_bill(
            "USD",
            Utc::now() + Duration::hours(1),
            Utc::now() + Duration::hours(2),
            &unique_key("bill-pending"),
        )
        .await
        .unwrap();

    let result = billing.add_line_item(bill.id, line_item(100)).await;
    assert!(matches!(result, Err(AppError::FailedPrecondition(_))));
}

#[tokio::test]
#[ignore] // Requires database
async fn test_duplicate_bill_key_conflicts() {
    let pool = test_pool().await;
    let billing = service(&pool);
    let key = unique_key("bill-dup");

    billing
        .create_bill(
            "USD",
            Utc::now() + Duration::minutes(1),
            Utc::now() + Duration::hours(1),
            &key,
        )
        .await
        .unwrap();

    let second = billing
        .create_bill(
            "USD",
            Utc::now() + Duration::minutes(1),
            Utc::now() + Duration::hours(1),
            &key,
        )
        .await;
    assert!(matches!(second, Err(AppError::AlreadyExists(_))));

    let repo = PgBillRepository::new(pool.clone());
    let (_, _total) = repo.find_page(1, 0).await.unwrap();
}
