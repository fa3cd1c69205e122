//! HTTP handlers

pub mod bill;
pub mod line_item;

use actix_web::web;
use tally_core::AppError;

/// Configure bill routes under `/v1/bills`
pub fn configure_bills(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/bills")
            .route("", web::post().to(bill::create_bill))
            .route("", web::get().to(bill::list_bills))
            .route("/{id}", web::get().to(bill::get_bill))
            .route("/{id}/close", web::post().to(bill::close_bill))
            .route("/{id}/line_items", web::post().to(line_item::add_line_item)),
    );
}

/// Decode a JSON request body, mapping malformed input to `InvalidArgument`
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidArgument(format!("invalid request body: {}", e)))
}

/// Reject non-positive path IDs before touching the database
pub(crate) fn require_positive_id(id: i32) -> Result<i32, AppError> {
    if id <= 0 {
        return Err(AppError::InvalidArgument("invalid bill ID".to_string()));
    }
    Ok(id)
}
