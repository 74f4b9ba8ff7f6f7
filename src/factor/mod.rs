pub mod composite;
pub mod single;

use crate::config::{PricingParams, ScanConfig};
use crate::errors::{EngineError, EngineResult};
use crate::feeds::{ChainSide, MarketDataProvider, OptionChain};
use crate::models::volatility::VolatilityResolver;
use crate::models::PricingModel;
use crate::types::{
    expiry_years, FactorKind, FactorRecord, FallbackWarning, MarketInputs, MispricingRecord,
    OptionKind, PriceResult, VolatilityInput,
};
use chrono::NaiveDate;

/// Pair each theoretical price with its market price.
///
/// Strikes whose market price is missing, non-finite or non-positive are
/// dropped. Percent mispricing is None when the theoretical price is zero.
pub fn mispricing_records(
    prices: &[PriceResult],
    market_prices: &[Option<f64>],
) -> EngineResult<Vec<MispricingRecord>> {
    if prices.len() != market_prices.len() {
        return Err(EngineError::config(format!(
            "{} theoretical prices but {} market prices",
            prices.len(),
            market_prices.len()
        )));
    }

    Ok(prices
        .iter()
        .zip(market_prices)
        .filter_map(|(px, &market)| {
            let market = market.filter(|m| m.is_finite() && *m > 0.0)?;
            let mispricing = market - px.theoretical_price;
            Some(MispricingRecord {
                strike: px.strike,
                market_price: market,
                theoretical_price: px.theoretical_price,
                mispricing,
                percent_mispricing: (px.theoretical_price > 0.0)
                    .then(|| mispricing / px.theoretical_price),
                volatility: px.volatility,
                vol_source: px.vol_source,
            })
        })
        .collect())
}

/// Spot, chain and carry for one (symbol, expiry, valuation date).
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub valuation_date: NaiveDate,
    /// Expiry actually served by the provider.
    pub expiry: NaiveDate,
    pub spot: f64,
    pub expiry_years: f64,
    pub rate: f64,
    pub dividend_yield: f64,
    pub chain: OptionChain,
}

impl MarketSnapshot {
    pub fn fetch<P: MarketDataProvider + ?Sized>(
        provider: &P,
        symbol: &str,
        expiry: NaiveDate,
        as_of: NaiveDate,
        params: &PricingParams,
    ) -> EngineResult<Self> {
        let spot = provider.get_spot(symbol, as_of)?;
        let chain = provider.get_option_chain(symbol, expiry, as_of)?;
        let served = chain.expiry.unwrap_or(expiry);
        let dividend_yield = match params.dividend_yield {
            Some(q) => q,
            None => provider.get_dividend_yield(symbol, as_of)?,
        };

        Ok(Self {
            symbol: symbol.to_string(),
            valuation_date: as_of,
            expiry: served,
            spot,
            expiry_years: expiry_years(as_of, served),
            rate: params.rate,
            dividend_yield,
            chain,
        })
    }

    pub fn market(&self) -> MarketInputs {
        MarketInputs {
            spot: self.spot,
            expiry_years: self.expiry_years,
            rate: self.rate,
            dividend_yield: self.dividend_yield,
        }
    }
}

/// Records for one side of the chain plus the fallback the resolver reported.
#[derive(Debug, Clone, PartialEq)]
pub struct SidePass {
    pub kind: OptionKind,
    pub records: Vec<MispricingRecord>,
    pub fallback: Option<FallbackWarning>,
}

/// One full pricing pass over one side of the snapshot's chain.
pub(crate) fn price_side<P: MarketDataProvider + ?Sized>(
    provider: &P,
    snapshot: &MarketSnapshot,
    kind: OptionKind,
    params: &PricingParams,
    engine: &dyn PricingModel,
) -> EngineResult<SidePass> {
    let side = snapshot.chain.side(kind);
    side.check_aligned()?;

    let band = params
        .moneyness
        .map(|(low, high)| (low * snapshot.spot, high * snapshot.spot));
    // Quotes come from the market: unusable or repeated strikes are dropped, not fatal.
    let mut seen: Vec<f64> = Vec::with_capacity(side.len());
    let mask: Vec<bool> = (0..side.len())
        .map(|i| {
            let k = side.strikes[i];
            let priced = side.market_prices[i].is_some_and(|m| m.is_finite() && m > 0.0);
            let in_band = band.map_or(true, |(lo, hi)| k >= lo && k <= hi);
            let usable = k.is_finite() && k > 0.0 && !seen.contains(&k);
            if usable {
                seen.push(k);
            }
            priced && in_band && usable
        })
        .collect();
    let dropped = side.strikes.len() - seen.len();
    if dropped > 0 {
        tracing::warn!(
            symbol = %snapshot.symbol,
            date = %snapshot.valuation_date,
            kind = %kind,
            dropped,
            "chain lists repeated or invalid strikes"
        );
    }
    let keep = |i: usize| mask[i];

    // A per-strike array lines up with the full chain side; filter it with the chain.
    let volatility = match &params.volatility {
        VolatilityInput::PerStrike(values) => {
            if values.len() != side.len() {
                return Err(EngineError::config(format!(
                    "per-strike volatility has {} entries but the {kind} chain lists {} strikes",
                    values.len(),
                    side.len()
                )));
            }
            VolatilityInput::PerStrike(
                values
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| keep(*i))
                    .map(|(_, v)| *v)
                    .collect(),
            )
        }
        other => other.clone(),
    };
    let filtered: ChainSide = side.retain_indices(keep);

    if filtered.is_empty() {
        tracing::debug!(
            symbol = %snapshot.symbol,
            date = %snapshot.valuation_date,
            kind = %kind,
            "no priced strikes in chain"
        );
        return Ok(SidePass {
            kind,
            records: Vec::new(),
            fallback: None,
        });
    }

    let resolver = VolatilityResolver::new(provider, &snapshot.symbol, snapshot.valuation_date);
    let resolved = resolver.resolve(&filtered.strikes, &volatility, &filtered.implied_vols)?;
    let theo = engine.price(&snapshot.market(), &filtered.strikes, &resolved.values, kind)?;

    let model = engine.kind();
    let prices: Vec<PriceResult> = filtered
        .strikes
        .iter()
        .zip(&theo)
        .zip(resolved.values.iter().zip(&resolved.sources))
        .map(|((&strike, &theoretical_price), (&volatility, &vol_source))| PriceResult {
            strike,
            theoretical_price,
            model,
            volatility,
            vol_source,
        })
        .collect();

    let records = mispricing_records(&prices, &filtered.market_prices)?;
    tracing::debug!(
        symbol = %snapshot.symbol,
        date = %snapshot.valuation_date,
        kind = %kind,
        strikes = records.len(),
        "side priced"
    );

    Ok(SidePass {
        kind,
        records,
        fallback: resolved.fallback,
    })
}

/// Factor rows for one symbol on one valuation date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyFactor {
    pub valuation_date: NaiveDate,
    pub records: Vec<FactorRecord>,
    pub fallbacks: Vec<FallbackWarning>,
}

/// Compute the configured factor for one date.
pub fn evaluate_date<P: MarketDataProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    as_of: NaiveDate,
    cfg: &ScanConfig,
) -> EngineResult<DailyFactor> {
    match cfg.factor {
        FactorKind::Call | FactorKind::Put => {
            let kind = if cfg.factor == FactorKind::Call {
                OptionKind::Call
            } else {
                OptionKind::Put
            };
            let pass = single::evaluate(provider, symbol, cfg.expiry, as_of, kind, &cfg.pricing)?;
            Ok(DailyFactor {
                valuation_date: as_of,
                records: pass.records.into_iter().map(FactorRecord::Single).collect(),
                fallbacks: pass.fallback.into_iter().collect(),
            })
        }
        FactorKind::Composite => {
            let pass = composite::evaluate(
                provider,
                symbol,
                cfg.expiry,
                as_of,
                &cfg.pricing,
                cfg.weights,
            )?;
            Ok(DailyFactor {
                valuation_date: as_of,
                records: pass.records.into_iter().map(FactorRecord::Composite).collect(),
                fallbacks: pass.fallbacks,
            })
        }
    }
}
