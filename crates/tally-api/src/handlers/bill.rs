//! Bill API handlers
//!
//! Create, fetch, list, and close bills. Mutating handlers run under the
//! idempotency gate; workflow interactions never block the response.

use actix_web::{
    web::{Bytes, Data, Json, Path, Query},
    HttpRequest,
};
use tally_core::{traits::PageRequest, AppError};
use tally_services::BillingService;
use tally_workflow::{BillingPeriodParams, WorkflowRuntime};
use tracing::{debug, error, info, instrument};
use validator::Validate;

use crate::dto::{
    BillDto, BillResponse, CloseBillRequest, CreateBillRequest, ListBillsQuery, ListBillsResponse,
};
use crate::handlers::{parse_body, require_positive_id};
use crate::idempotency::{IdempotencyGate, IdempotencyKey};
use crate::tasks::TaskPool;

/// Create a bill for a billing period and start its lifecycle workflow
///
/// ```text
/// POST /v1/bills
/// X-Idempotency-Key: <key>
/// {"currency": "USD", "start_time": "...", "end_time": "..."}
/// ```
#[instrument(skip_all)]
pub async fn create_bill(
    req: HttpRequest,
    key: IdempotencyKey,
    body: Bytes,
    billing: Data<BillingService>,
    runtime: Data<WorkflowRuntime>,
    gate: Data<IdempotencyGate>,
) -> Result<Json<BillResponse>, AppError> {
    let request: CreateBillRequest = parse_body(&body)?;
    request.validate().map_err(AppError::from)?;
    let (start_time, end_time) = request.resolve_period()?;

    let billing = billing.into_inner();
    let runtime = runtime.get_ref().clone();
    let currency = request.currency.clone();
    let idempotency_key = key.0.clone();

    let response = gate
        .execute(req.path(), &key.0, &body, || async move {
            let bill = billing
                .create_bill(&currency, start_time, end_time, &idempotency_key)
                .await?;

            // The bill exists regardless of workflow start problems; a
            // duplicate start against the same workflow id is a no-op.
            if let Err(err) = runtime
                .start(
                    &bill.workflow_id,
                    BillingPeriodParams {
                        bill_id: bill.id,
                        start_time: bill.start_time,
                        end_time: bill.end_time,
                    },
                )
                .await
            {
                error!(
                    bill_id = bill.id,
                    workflow_id = %bill.workflow_id,
                    error = %err,
                    "Workflow start issue"
                );
            }

            Ok(BillResponse {
                bill: BillDto::from_bill(bill),
            })
        })
        .await?;

    info!(bill_id = response.bill.id, "Created bill");
    Ok(Json(response))
}

/// Get a bill with its line items
///
/// ```text
/// GET /v1/bills/{id}
/// ```
#[instrument(skip_all)]
pub async fn get_bill(
    path: Path<i32>,
    billing: Data<BillingService>,
) -> Result<Json<BillResponse>, AppError> {
    let bill_id = require_positive_id(path.into_inner())?;
    debug!(bill_id, "Fetching bill");

    let (bill, line_items) = billing.get_bill(bill_id).await?;

    Ok(Json(BillResponse {
        bill: BillDto::with_line_items(bill, line_items),
    }))
}

/// List bills with limit/offset paging
///
/// ```text
/// GET /v1/bills?limit=10&offset=0
/// ```
#[instrument(skip_all)]
pub async fn list_bills(
    query: Query<ListBillsQuery>,
    billing: Data<BillingService>,
) -> Result<Json<ListBillsResponse>, AppError> {
    let page = PageRequest::new(query.limit, query.offset);
    debug!(limit = page.limit, offset = page.offset, "Listing bills");

    let (bills, total_count) = billing.list_bills(page).await?;

    Ok(Json(ListBillsResponse {
        bills: bills.into_iter().map(BillDto::from_bill).collect(),
        total_count,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Close a bill
///
/// Idempotent on already-closed bills. After a successful close the bill's
/// workflow is terminated in the background so it does not run a duplicate
/// auto-close.
///
/// ```text
/// POST /v1/bills/{id}/close
/// X-Idempotency-Key: <key>
/// {"reason": "eom"}
/// ```
#[instrument(skip_all)]
pub async fn close_bill(
    req: HttpRequest,
    path: Path<i32>,
    key: IdempotencyKey,
    body: Bytes,
    billing: Data<BillingService>,
    runtime: Data<WorkflowRuntime>,
    gate: Data<IdempotencyGate>,
    tasks: Data<TaskPool>,
) -> Result<Json<BillResponse>, AppError> {
    let bill_id = require_positive_id(path.into_inner())?;
    let request: CloseBillRequest = parse_body(&body)?;
    request.validate().map_err(AppError::from)?;

    let billing = billing.into_inner();
    let workflow_runtime = runtime.get_ref().clone();
    let task_pool = tasks.get_ref().clone();
    let reason = request.reason.clone();

    let response = gate
        .execute(req.path(), &key.0, &body, || async move {
            let closed = billing.close_bill(bill_id, &reason).await?;

            let workflow_id = closed.workflow_id.clone();
            task_pool.spawn("terminate_workflow", async move {
                workflow_runtime.terminate(&workflow_id).await
            });

            let (bill, line_items) = billing.get_bill(bill_id).await?;
            Ok(BillResponse {
                bill: BillDto::with_line_items(bill, line_items),
            })
        })
        .await?;

    info!(bill_id, "Closed bill");
    Ok(Json(response))
}
