use super::{MarketDataProvider, OptionChain};
use crate::errors::{EngineError, EngineResult};
use chrono::NaiveDate;
use std::collections::HashMap;

/// In-memory provider fed by the caller. Used by tests and by embedders that
/// already hold their market data.
///
/// Spots and chains are keyed by (symbol, as-of date); the chain is served for
/// whatever expiry is requested. Historical vol and dividend yield are per symbol.
#[derive(Debug, Clone, Default)]
pub struct StaticMarketData {
    spots: HashMap<(String, NaiveDate), f64>,
    chains: HashMap<(String, NaiveDate), OptionChain>,
    historical_vols: HashMap<String, f64>,
    dividend_yields: HashMap<String, f64>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spot(mut self, symbol: &str, as_of: NaiveDate, spot: f64) -> Self {
        self.spots.insert((symbol.to_string(), as_of), spot);
        self
    }

    pub fn with_chain(mut self, symbol: &str, as_of: NaiveDate, chain: OptionChain) -> Self {
        self.chains.insert((symbol.to_string(), as_of), chain);
        self
    }

    pub fn with_historical_vol(mut self, symbol: &str, vol: f64) -> Self {
        self.historical_vols.insert(symbol.to_string(), vol);
        self
    }

    pub fn with_dividend_yield(mut self, symbol: &str, q: f64) -> Self {
        self.dividend_yields.insert(symbol.to_string(), q);
        self
    }
}

impl MarketDataProvider for StaticMarketData {
    fn get_spot(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64> {
        self.spots
            .get(&(symbol.to_string(), as_of))
            .copied()
            .ok_or_else(|| EngineError::unavailable(format!("no spot for {symbol} on {as_of}")))
    }

    fn get_option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        as_of: NaiveDate,
    ) -> EngineResult<OptionChain> {
        let mut chain = self
            .chains
            .get(&(symbol.to_string(), as_of))
            .cloned()
            .ok_or_else(|| {
                EngineError::unavailable(format!("no option chain for {symbol} on {as_of}"))
            })?;
        chain.expiry.get_or_insert(expiry);
        Ok(chain)
    }

    fn get_historical_volatility(
        &self,
        symbol: &str,
        _as_of: NaiveDate,
        _window_days: usize,
    ) -> EngineResult<f64> {
        self.historical_vols
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::unavailable(format!("no price history for {symbol}")))
    }

    fn get_dividend_yield(&self, symbol: &str, _as_of: NaiveDate) -> EngineResult<f64> {
        Ok(self.dividend_yields.get(symbol).copied().unwrap_or(0.0))
    }
}
