use super::{price_side, MarketSnapshot};
use crate::config::PricingParams;
use crate::errors::{EngineError, EngineResult};
use crate::feeds::MarketDataProvider;
use crate::types::{CompositeRecord, FallbackWarning, MispricingRecord, OptionKind};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Call/put blend. Each weight is non-negative and they sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompositeWeights {
    call: f64,
    put: f64,
}

impl CompositeWeights {
    pub fn new(call: f64, put: f64) -> EngineResult<Self> {
        if !(call.is_finite() && put.is_finite()) || call < 0.0 || put < 0.0 {
            return Err(EngineError::config(format!(
                "weights must be finite and non-negative, got call={call} put={put}"
            )));
        }
        if (call + put - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::config(format!(
                "weights must sum to 1, got call={call} put={put}"
            )));
        }
        Ok(Self { call, put })
    }

    #[inline]
    pub fn call(&self) -> f64 {
        self.call
    }

    #[inline]
    pub fn put(&self) -> f64 {
        self.put
    }
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self { call: 0.5, put: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositePass {
    pub records: Vec<CompositeRecord>,
    /// At most one per side.
    pub fallbacks: Vec<FallbackWarning>,
}

/// Weighted call/put mispricing over the strikes quoted on both sides.
pub fn evaluate<P: MarketDataProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    expiry: NaiveDate,
    as_of: NaiveDate,
    params: &PricingParams,
    weights: CompositeWeights,
) -> EngineResult<CompositePass> {
    let engine = params.engine()?;
    let snapshot = MarketSnapshot::fetch(provider, symbol, expiry, as_of, params)?;

    let calls = price_side(provider, &snapshot, OptionKind::Call, params, engine.as_ref())?;
    let puts = price_side(provider, &snapshot, OptionKind::Put, params, engine.as_ref())?;

    let records = join(&calls.records, &puts.records, weights);
    let fallbacks = calls.fallback.into_iter().chain(puts.fallback).collect();

    Ok(CompositePass { records, fallbacks })
}

/// Inner join on strike, ascending.
pub fn join(
    calls: &[MispricingRecord],
    puts: &[MispricingRecord],
    weights: CompositeWeights,
) -> Vec<CompositeRecord> {
    let puts_by_strike: HashMap<u64, &MispricingRecord> =
        puts.iter().map(|p| (p.strike.to_bits(), p)).collect();

    let mut out: Vec<CompositeRecord> = calls
        .iter()
        .filter_map(|call| {
            let put = puts_by_strike.get(&call.strike.to_bits())?;
            Some(blend(call, put, weights))
        })
        .collect();
    out.sort_by(|a, b| a.strike.total_cmp(&b.strike));
    out
}

fn blend(call: &MispricingRecord, put: &MispricingRecord, w: CompositeWeights) -> CompositeRecord {
    let market_composite = w.call * call.market_price + w.put * put.market_price;
    let theoretical_composite = w.call * call.theoretical_price + w.put * put.theoretical_price;
    let composite = w.call * call.mispricing + w.put * put.mispricing;

    CompositeRecord {
        strike: call.strike,
        call: *call,
        put: *put,
        call_weight: w.call,
        put_weight: w.put,
        composite,
        market_composite,
        theoretical_composite,
        composite_percent: (theoretical_composite > 0.0).then(|| composite / theoretical_composite),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::{fixtures, single};
    use crate::types::{VolSource, VolatilityInput};

    fn rec(strike: f64, market: f64, theo: f64) -> MispricingRecord {
        MispricingRecord {
            strike,
            market_price: market,
            theoretical_price: theo,
            mispricing: market - theo,
            percent_mispricing: Some((market - theo) / theo),
            volatility: 0.2,
            vol_source: VolSource::MarketImplied,
        }
    }

    #[test]
    fn test_weights_validated() {
        assert!(CompositeWeights::new(0.3, 0.7).is_ok());
        assert!(CompositeWeights::new(0.3, 0.7000005).is_ok());
        assert!(CompositeWeights::new(0.6, 0.6).is_err());
        assert!(CompositeWeights::new(-0.5, 1.5).is_err());
        assert!(CompositeWeights::new(f64::NAN, 1.0).is_err());
        assert_eq!(CompositeWeights::default(), CompositeWeights::new(0.5, 0.5).unwrap());
    }

    #[test]
    fn test_join_is_inner_on_strike() {
        let calls = [rec(100.0, 4.0, 3.5), rec(90.0, 11.0, 10.8), rec(80.0, 20.5, 20.1)];
        let puts = [rec(90.0, 1.0, 1.1), rec(100.0, 3.9, 3.6), rec(120.0, 19.0, 19.5)];
        let joined = join(&calls, &puts, CompositeWeights::default());
        let strikes: Vec<f64> = joined.iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![90.0, 100.0]);
        let atm = &joined[1];
        assert!((atm.composite - 0.5 * (0.5 + 0.3)).abs() < 1e-12);
        assert!((atm.market_composite - 3.95).abs() < 1e-12);
    }

    #[test]
    fn test_pure_call_weight_equals_call_factor() {
        let provider = fixtures::provider();
        let params = PricingParams::default();
        let pass = evaluate(
            &provider,
            "ACME",
            fixtures::expiry(),
            fixtures::as_of(),
            &params,
            CompositeWeights::new(1.0, 0.0).unwrap(),
        )
        .unwrap();
        let calls = single::evaluate(
            &provider,
            "ACME",
            fixtures::expiry(),
            fixtures::as_of(),
            OptionKind::Call,
            &params,
        )
        .unwrap();

        assert!(!pass.records.is_empty());
        for row in &pass.records {
            let call = calls.records.iter().find(|c| c.strike == row.strike).unwrap();
            assert_eq!(row.composite, call.mispricing, "strike {}", row.strike);
        }
    }

    #[test]
    fn test_pure_put_weight_equals_put_factor() {
        let provider = fixtures::provider();
        let params = PricingParams {
            volatility: VolatilityInput::Flat(0.22),
            ..PricingParams::default()
        };
        let pass = evaluate(
            &provider,
            "ACME",
            fixtures::expiry(),
            fixtures::as_of(),
            &params,
            CompositeWeights::new(0.0, 1.0).unwrap(),
        )
        .unwrap();
        let puts = single::evaluate(
            &provider,
            "ACME",
            fixtures::expiry(),
            fixtures::as_of(),
            OptionKind::Put,
            &params,
        )
        .unwrap();

        for row in &pass.records {
            let put = puts.records.iter().find(|p| p.strike == row.strike).unwrap();
            assert_eq!(row.composite, put.mispricing, "strike {}", row.strike);
        }
        assert!(pass.fallbacks.is_empty());
    }

    #[test]
    fn test_one_per_strike_array_serves_both_sides() {
        let provider = fixtures::provider();
        let params = PricingParams {
            volatility: VolatilityInput::PerStrike(vec![0.2, 0.21, 0.22, 0.23, 0.24]),
            ..PricingParams::default()
        };
        let pass = evaluate(
            &provider,
            "ACME",
            fixtures::expiry(),
            fixtures::as_of(),
            &params,
            CompositeWeights::default(),
        )
        .unwrap();
        assert_eq!(pass.records.len(), 4);

        let mut lopsided = fixtures::chain();
        lopsided.puts.push(115.0, Some(15.5), Some(0.25));
        let provider = crate::feeds::memory::StaticMarketData::new()
            .with_spot("ACME", fixtures::as_of(), 100.0)
            .with_chain("ACME", fixtures::as_of(), lopsided);
        let err = evaluate(
            &provider,
            "ACME",
            fixtures::expiry(),
            fixtures::as_of(),
            &params,
            CompositeWeights::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)), "got {err}");
    }
}
