//! Entry points for callers that embed the engine. Each maps one-to-one onto
//! a mode of the binary.

use crate::config::{PricingParams, ScanConfig};
use crate::errors::{EngineError, EngineResult};
use crate::factor::composite::{self, CompositePass, CompositeWeights};
use crate::factor::{single, SidePass};
use crate::feeds::MarketDataProvider;
use crate::models::binomial::BinomialTree;
use crate::models::black_scholes::BlackScholes;
use crate::models::PricingModel;
use crate::scan::{BatchRunner, RangeScanner};
use crate::sink::OutputSink;
use crate::types::{
    BatchResult, ExerciseStyle, MarketInputs, OptionKind, PriceResult, ScanResult, VolSource,
    VolatilityInput,
};
use chrono::NaiveDate;
use std::sync::Arc;

/// Binomial price per strike. Volatility must be given explicitly.
pub fn price_tree(
    market: &MarketInputs,
    strikes: &[f64],
    volatility: &VolatilityInput,
    kind: OptionKind,
    steps: usize,
    american: bool,
) -> EngineResult<Vec<PriceResult>> {
    let tree = BinomialTree::new(steps, ExerciseStyle::from_american(american))?;
    price_with(&tree, market, strikes, volatility, kind)
}

/// Black-Scholes price per strike. European only.
pub fn price_black_scholes(
    market: &MarketInputs,
    strikes: &[f64],
    volatility: &VolatilityInput,
    kind: OptionKind,
    american: bool,
) -> EngineResult<Vec<PriceResult>> {
    if american {
        return Err(EngineError::config(
            "Black-Scholes cannot price American exercise; use the binomial tree",
        ));
    }
    price_with(&BlackScholes::new(), market, strikes, volatility, kind)
}

pub fn call_mispricing<P: MarketDataProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    expiry: NaiveDate,
    as_of: NaiveDate,
    params: &PricingParams,
) -> EngineResult<SidePass> {
    single::evaluate(provider, symbol, expiry, as_of, OptionKind::Call, params)
}

pub fn put_mispricing<P: MarketDataProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    expiry: NaiveDate,
    as_of: NaiveDate,
    params: &PricingParams,
) -> EngineResult<SidePass> {
    single::evaluate(provider, symbol, expiry, as_of, OptionKind::Put, params)
}

pub fn composite_mispricing<P: MarketDataProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    expiry: NaiveDate,
    as_of: NaiveDate,
    params: &PricingParams,
    weights: CompositeWeights,
) -> EngineResult<CompositePass> {
    composite::evaluate(provider, symbol, expiry, as_of, params, weights)
}

pub fn range_scan<P: MarketDataProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    config: &ScanConfig,
    sink: Option<&mut dyn OutputSink>,
) -> EngineResult<ScanResult> {
    RangeScanner::new(provider, config).scan(symbol, sink)
}

pub async fn batch_scan<P: MarketDataProvider + ?Sized + 'static>(
    provider: Arc<P>,
    tickers: &[String],
    config: ScanConfig,
    max_workers: usize,
    sink: Option<&mut dyn OutputSink>,
) -> EngineResult<BatchResult> {
    BatchRunner::new(provider, config, max_workers)?
        .run(tickers, sink)
        .await
}

fn price_with(
    engine: &dyn PricingModel,
    market: &MarketInputs,
    strikes: &[f64],
    volatility: &VolatilityInput,
    kind: OptionKind,
) -> EngineResult<Vec<PriceResult>> {
    let (sigmas, vol_source) = match volatility {
        VolatilityInput::Flat(sigma) => (vec![*sigma; strikes.len()], VolSource::UserFlat),
        VolatilityInput::PerStrike(values) => (values.clone(), VolSource::UserArray),
        VolatilityInput::Unresolved => {
            return Err(EngineError::config(
                "direct pricing needs a flat sigma or a per-strike volatility array",
            ))
        }
    };
    let prices = engine.price(market, strikes, &sigmas, kind)?;
    let model = engine.kind();

    Ok(strikes
        .iter()
        .zip(prices)
        .zip(sigmas)
        .map(|((&strike, theoretical_price), volatility)| PriceResult {
            strike,
            theoretical_price,
            model,
            volatility,
            vol_source,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::fixtures;
    use crate::types::{FactorKind, ModelKind};

    fn market() -> MarketInputs {
        MarketInputs { spot: 100.0, expiry_years: 0.5, rate: 0.02, dividend_yield: 0.0 }
    }

    #[test]
    fn test_price_tree_flat_equals_per_strike() {
        let strikes = [90.0, 100.0, 110.0];
        let flat = price_tree(&market(), &strikes, &VolatilityInput::Flat(0.3), OptionKind::Put, 50, true).unwrap();
        let arr = price_tree(
            &market(),
            &strikes,
            &VolatilityInput::PerStrike(vec![0.3; 3]),
            OptionKind::Put,
            50,
            true,
        )
        .unwrap();
        for (a, b) in flat.iter().zip(&arr) {
            assert_eq!(a.theoretical_price, b.theoretical_price);
            assert_eq!(a.model, ModelKind::Binomial);
        }
        assert_eq!(flat[0].vol_source, VolSource::UserFlat);
        assert_eq!(arr[0].vol_source, VolSource::UserArray);
    }

    #[test]
    fn test_direct_pricing_requires_volatility() {
        let err = price_tree(&market(), &[100.0], &VolatilityInput::Unresolved, OptionKind::Call, 50, true)
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_black_scholes_rejects_american() {
        let vol = VolatilityInput::Flat(0.2);
        assert!(price_black_scholes(&market(), &[100.0], &vol, OptionKind::Put, true).is_err());
        let px = price_black_scholes(&market(), &[100.0], &vol, OptionKind::Put, false).unwrap();
        assert_eq!(px[0].model, ModelKind::BlackScholes);
        assert!(px[0].theoretical_price > 0.0);
    }

    #[test]
    fn test_mispricing_entry_points() {
        let provider = fixtures::provider();
        let params = PricingParams::default();
        let calls = call_mispricing(&provider, "ACME", fixtures::expiry(), fixtures::as_of(), &params).unwrap();
        let puts = put_mispricing(&provider, "ACME", fixtures::expiry(), fixtures::as_of(), &params).unwrap();
        assert_eq!(calls.kind, OptionKind::Call);
        assert_eq!(puts.records.len(), 5);
        let comp = composite_mispricing(
            &provider,
            "ACME",
            fixtures::expiry(),
            fixtures::as_of(),
            &params,
            CompositeWeights::default(),
        )
        .unwrap();
        assert_eq!(comp.records.len(), calls.records.len());
    }

    #[tokio::test]
    async fn test_batch_scan_entry_point() {
        let provider = Arc::new(fixtures::provider());
        let config = ScanConfig {
            expiry: fixtures::expiry(),
            start: fixtures::as_of(),
            end: fixtures::as_of(),
            factor: FactorKind::Put,
            weights: CompositeWeights::default(),
            pricing: PricingParams::default(),
        };
        let single = range_scan(&*provider, "ACME", &config, None).unwrap();
        let batch = batch_scan(provider, &["ACME".to_string()], config, 4, None).await.unwrap();
        match &batch.outcomes["ACME"] {
            crate::types::TickerOutcome::Completed(scan) => assert_eq!(scan, &single),
            other => panic!("expected completion, got {other:?}"),
        }
    }
}
