//! Currency service
//!
//! Exchange-rate lookups and amount conversion. Rates are stored per 1 USD,
//! so converting from A to B applies `rate(B) / rate(A)`. The multiply runs
//! on fixed-point decimals and the result is rounded half-to-even exactly
//! once, on the final cents.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tally_core::{
    models::{ConversionMetadata, Currency},
    traits::CurrencyRepository,
    AppError, AppResult,
};
use tracing::{debug, instrument};

/// Currency service
#[derive(Clone)]
pub struct CurrencyService {
    currencies: Arc<dyn CurrencyRepository>,
}

impl CurrencyService {
    /// Create a new currency service
    pub fn new(currencies: Arc<dyn CurrencyRepository>) -> Self {
        Self { currencies }
    }

    /// Look up an enabled currency, failing with `InvalidArgument` when the
    /// code is unknown or disabled. Used when validating new bills.
    pub async fn ensure_enabled(&self, code: &str) -> AppResult<Currency> {
        let code = code.to_ascii_uppercase();
        self.currencies
            .find_by_code(&code)
            .await?
            .ok_or_else(|| AppError::InvalidArgument(format!("currency {} is not enabled", code)))
    }

    /// Convert an amount between currencies.
    ///
    /// Identity conversions return the amount unchanged with no metadata.
    /// Otherwise both currencies are looked up (missing → `NotFound`) and
    /// the converted amount is returned together with metadata recording the
    /// original submission.
    #[instrument(skip(self))]
    pub async fn convert(
        &self,
        amount_cents: i64,
        from: &str,
        to: &str,
    ) -> AppResult<(i64, Option<ConversionMetadata>)> {
        let from = from.to_ascii_uppercase();
        let to = to.to_ascii_uppercase();

        if from == to {
            return Ok((amount_cents, None));
        }

        let from_currency = self.lookup(&from).await?;
        let to_currency = self.lookup(&to).await?;

        if from_currency.rate <= Decimal::ZERO || to_currency.rate <= Decimal::ZERO {
            return Err(AppError::Internal(format!(
                "non-positive exchange rate configured for {} or {}",
                from, to
            )));
        }

        let exchange_rate = to_currency.rate / from_currency.rate;
        let converted = (Decimal::from(amount_cents) * exchange_rate)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        let converted_cents = converted.to_i64().ok_or_else(|| {
            AppError::Internal(format!(
                "converted amount out of range: {} {} to {}",
                amount_cents, from, to
            ))
        })?;

        debug!(
            "Converted {} {} to {} {} at rate {}",
            amount_cents, from, converted_cents, to, exchange_rate
        );

        Ok((
            converted_cents,
            Some(ConversionMetadata {
                original_amount_cents: amount_cents,
                original_currency: from,
                exchange_rate,
            }),
        ))
    }

    async fn lookup(&self, code: &str) -> AppResult<Currency> {
        self.currencies
            .find_by_code(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("currency {} not found", code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FixedRates;

    #[async_trait]
    impl CurrencyRepository for FixedRates {
        async fn find_by_code(&self, code: &str) -> AppResult<Option<Currency>> {
            let rate = match code {
                "USD" => dec!(1.0),
                "GEL" => dec!(2.7),
                "EUR" => dec!(0.92),
                _ => return Ok(None),
            };
            Ok(Some(Currency {
                id: 1,
                code: code.to_string(),
                symbol: None,
                rate,
                enabled: true,
            }))
        }
    }

    fn service() -> CurrencyService {
        CurrencyService::new(Arc::new(FixedRates))
    }

    #[tokio::test]
    async fn test_identity_conversion() {
        let (amount, metadata) = service().convert(1000, "USD", "USD").await.unwrap();
        assert_eq!(amount, 1000);
        assert!(metadata.is_none());
    }

    #[tokio::test]
    async fn test_gel_to_usd() {
        let (amount, metadata) = service().convert(27_000, "GEL", "USD").await.unwrap();
        assert_eq!(amount, 10_000);

        let metadata = metadata.unwrap();
        assert_eq!(metadata.original_amount_cents, 27_000);
        assert_eq!(metadata.original_currency, "GEL");
        // rate(USD) / rate(GEL) = 1 / 2.7
        let expected = dec!(1.0) / dec!(2.7);
        assert_eq!(metadata.exchange_rate, expected);
    }

    #[tokio::test]
    async fn test_usd_to_gel() {
        let (amount, _) = service().convert(10_000, "USD", "GEL").await.unwrap();
        assert_eq!(amount, 27_000);
    }

    #[tokio::test]
    async fn test_round_trip_within_one_cent() {
        let svc = service();
        for amount in [1i64, 7, 99, 12_345, 1_000_000, 10_000_000_000] {
            let (there, _) = svc.convert(amount, "USD", "EUR").await.unwrap();
            let (back, _) = svc.convert(there, "EUR", "USD").await.unwrap();
            assert!(
                (back - amount).abs() <= 1,
                "round trip drifted: {} -> {} -> {}",
                amount,
                there,
                back
            );
        }
    }

    #[tokio::test]
    async fn test_half_to_even_rounding() {
        // EUR -> USD at 1 / 0.92: pick amounts landing exactly on .5 via a
        // synthetic 0.5 rate instead
        struct HalfRate;

        #[async_trait]
        impl CurrencyRepository for HalfRate {
            async fn find_by_code(&self, code: &str) -> AppResult<Option<Currency>> {
                let rate = match code {
                    "USD" => dec!(1.0),
                    "HLF" => dec!(2.0),
                    _ => return Ok(None),
                };
                Ok(Some(Currency {
                    id: 1,
                    code: code.to_string(),
                    symbol: None,
                    rate,
                    enabled: true,
                }))
            }
        }

        let svc = CurrencyService::new(Arc::new(HalfRate));

        // 5 * 0.5 = 2.5 rounds to 2 (even); 15 * 0.5 = 7.5 rounds to 8
        let (amount, _) = svc.convert(5, "HLF", "USD").await.unwrap();
        assert_eq!(amount, 2);
        let (amount, _) = svc.convert(15, "HLF", "USD").await.unwrap();
        assert_eq!(amount, 8);
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let result = service().convert(100, "USD", "XXX").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_case_insensitive_codes() {
        let (amount, _) = service().convert(27_000, "gel", "usd").await.unwrap();
        assert_eq!(amount, 10_000);
    }
}
