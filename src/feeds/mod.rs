pub mod cache;
pub mod memory;
pub mod snapshot;

use crate::errors::{EngineError, EngineResult};
use crate::types::OptionKind;
use chrono::NaiveDate;
use std::sync::Arc;

/// Market data source for the pricing passes.
///
/// Implementations may block (file or network I/O); batch workers call them
/// from `spawn_blocking`. Any method may fail with `DataUnavailable`.
pub trait MarketDataProvider: Send + Sync {
    fn get_spot(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64>;

    fn get_option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        as_of: NaiveDate,
    ) -> EngineResult<OptionChain>;

    /// Annualized volatility over the trailing `window_days` trading days.
    fn get_historical_volatility(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        window_days: usize,
    ) -> EngineResult<f64>;

    fn get_dividend_yield(&self, _symbol: &str, _as_of: NaiveDate) -> EngineResult<f64> {
        Ok(0.0)
    }
}

impl<P: MarketDataProvider + ?Sized> MarketDataProvider for Arc<P> {
    fn get_spot(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64> {
        (**self).get_spot(symbol, as_of)
    }

    fn get_option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        as_of: NaiveDate,
    ) -> EngineResult<OptionChain> {
        (**self).get_option_chain(symbol, expiry, as_of)
    }

    fn get_historical_volatility(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        window_days: usize,
    ) -> EngineResult<f64> {
        (**self).get_historical_volatility(symbol, as_of, window_days)
    }

    fn get_dividend_yield(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64> {
        (**self).get_dividend_yield(symbol, as_of)
    }
}

/// Listed options for one expiry, as of one date.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionChain {
    /// The expiry actually served; may differ from the one requested.
    pub expiry: Option<NaiveDate>,
    pub calls: ChainSide,
    pub puts: ChainSide,
}

impl OptionChain {
    pub fn side(&self, kind: OptionKind) -> &ChainSide {
        match kind {
            OptionKind::Call => &self.calls,
            OptionKind::Put => &self.puts,
        }
    }
}

/// Column-oriented quotes for one side of a chain. All three columns are
/// aligned by index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChainSide {
    pub strikes: Vec<f64>,
    pub market_prices: Vec<Option<f64>>,
    pub implied_vols: Vec<Option<f64>>,
}

impl ChainSide {
    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    pub fn push(&mut self, strike: f64, market_price: Option<f64>, implied_vol: Option<f64>) {
        self.strikes.push(strike);
        self.market_prices.push(market_price);
        self.implied_vols.push(implied_vol);
    }

    pub fn check_aligned(&self) -> EngineResult<()> {
        if self.market_prices.len() != self.strikes.len()
            || self.implied_vols.len() != self.strikes.len()
        {
            return Err(EngineError::config(format!(
                "chain columns misaligned: {} strikes, {} prices, {} implied vols",
                self.strikes.len(),
                self.market_prices.len(),
                self.implied_vols.len()
            )));
        }
        Ok(())
    }

    /// Keep only the entries whose index satisfies `keep`, preserving order.
    pub fn retain_indices(&self, mut keep: impl FnMut(usize) -> bool) -> ChainSide {
        let mut out = ChainSide::default();
        for i in 0..self.strikes.len() {
            if keep(i) {
                out.push(self.strikes[i], self.market_prices[i], self.implied_vols[i]);
            }
        }
        out
    }
}

/// Mid of a two-sided quote. None unless both sides are positive.
#[inline]
pub fn mid_price(bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    match (bid, ask) {
        (Some(b), Some(a)) if b > 0.0 && a > 0.0 && b.is_finite() && a.is_finite() => {
            Some((b + a) / 2.0)
        }
        _ => None,
    }
}
