//! Line item API handlers

use actix_web::{
    web::{Bytes, Data, Json, Path},
    HttpRequest,
};
use tally_core::AppError;
use tally_services::{BillingService, LineItemParams};
use tally_workflow::{AddLineItemSignal, Signal, WorkflowRuntime};
use tracing::{info, instrument};
use validator::Validate;

use crate::dto::{CreateLineItemRequest, LineItemResponse};
use crate::handlers::{parse_body, require_positive_id};
use crate::idempotency::{IdempotencyGate, IdempotencyKey};
use crate::tasks::TaskPool;

/// Add a line item to an active bill
///
/// The insert commits before the response; afterwards the bill's workflow
/// is signalled in the background to refresh the materialized total.
///
/// ```text
/// POST /v1/bills/{id}/line_items
/// X-Idempotency-Key: <key>
/// {"currency": "USD", "amount_cents": 1000, "description": "...", "reference_id": "..."}
/// ```
#[instrument(skip_all)]
pub async fn add_line_item(
    req: HttpRequest,
    path: Path<i32>,
    key: IdempotencyKey,
    body: Bytes,
    billing: Data<BillingService>,
    runtime: Data<WorkflowRuntime>,
    gate: Data<IdempotencyGate>,
    tasks: Data<TaskPool>,
) -> Result<Json<LineItemResponse>, AppError> {
    let bill_id = require_positive_id(path.into_inner())?;
    let request: CreateLineItemRequest = parse_body(&body)?;
    request.validate().map_err(AppError::from)?;

    let billing = billing.into_inner();
    let workflow_runtime = runtime.get_ref().clone();
    let task_pool = tasks.get_ref().clone();
    let params = LineItemParams {
        currency: request.currency.clone(),
        amount_cents: request.amount_cents,
        description: request.description.clone(),
        reference_id: request.reference_id.clone(),
        idempotency_key: key.0.clone(),
    };

    let response = gate
        .execute(req.path(), &key.0, &body, || async move {
            let created = billing.add_line_item(bill_id, params).await?;

            let workflow_id = created.workflow_id.clone();
            let line_item_id = created.line_item.id;
            task_pool.spawn("signal_add_line_item", async move {
                workflow_runtime
                    .signal(
                        &workflow_id,
                        Signal::AddLineItem(AddLineItemSignal { line_item_id }),
                    )
                    .await
            });

            Ok(LineItemResponse {
                line_item: created.line_item.into(),
            })
        })
        .await?;

    info!(
        bill_id,
        line_item_id = response.line_item.id,
        "Added line item"
    );
    Ok(Json(response))
}
