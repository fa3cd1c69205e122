//! Currency reference data

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A supported currency with its exchange rate.
///
/// `rate` is expressed per 1 USD, so `rate("USD") == 1.0` and converting
/// from currency A to currency B applies `rate(B) / rate(A)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Currency {
    /// Unique identifier
    pub id: i32,

    /// Three-letter ISO code, unique
    pub code: String,

    /// Display symbol
    pub symbol: Option<String>,

    /// Units of this currency per 1 USD
    pub rate: Decimal,

    /// Whether the currency may be used for new bills and line items
    pub enabled: bool,
}
