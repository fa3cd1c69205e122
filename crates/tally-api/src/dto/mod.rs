//! Request/response DTOs

pub mod bill;
pub mod line_item;

pub use bill::{
    BillDto, BillResponse, CloseBillRequest, CreateBillRequest, ListBillsQuery, ListBillsResponse,
};
pub use line_item::{CreateLineItemRequest, LineItemDto, LineItemResponse};
