use super::{price_side, MarketSnapshot, SidePass};
use crate::config::PricingParams;
use crate::errors::EngineResult;
use crate::feeds::MarketDataProvider;
use crate::types::OptionKind;
use chrono::NaiveDate;

/// Call or put mispricing for one symbol, expiry and valuation date.
pub fn evaluate<P: MarketDataProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    expiry: NaiveDate,
    as_of: NaiveDate,
    kind: OptionKind,
    params: &PricingParams,
) -> EngineResult<SidePass> {
    let engine = params.engine()?;
    let snapshot = MarketSnapshot::fetch(provider, symbol, expiry, as_of, params)?;
    price_side(provider, &snapshot, kind, params, engine.as_ref())
}
