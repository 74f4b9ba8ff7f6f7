use super::{MarketDataProvider, OptionChain};
use crate::errors::EngineResult;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

type DayKey = (String, NaiveDate);

/// Read-through cache over another provider.
///
/// Spot, historical vol and dividend yield are memoized per (symbol, date);
/// chains pass straight through since each pass consumes them once. Errors
/// are never cached. A poisoned lock bypasses the cache instead of failing.
pub struct CachedProvider<P> {
    inner: P,
    spots: Mutex<HashMap<DayKey, f64>>,
    historical_vols: Mutex<HashMap<(String, NaiveDate, usize), f64>>,
    dividend_yields: Mutex<HashMap<DayKey, f64>>,
}

impl<P: MarketDataProvider> CachedProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            spots: Mutex::new(HashMap::new()),
            historical_vols: Mutex::new(HashMap::new()),
            dividend_yields: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

/// Look up `key`, computing and storing on miss. The lock is not held while
/// `fetch` runs, so slow providers don't serialize workers.
fn read_through<K, F>(cache: &Mutex<HashMap<K, f64>>, key: K, fetch: F) -> EngineResult<f64>
where
    K: Eq + Hash,
    F: FnOnce() -> EngineResult<f64>,
{
    if let Ok(map) = cache.lock() {
        if let Some(v) = map.get(&key) {
            return Ok(*v);
        }
    }
    let value = fetch()?;
    if let Ok(mut map) = cache.lock() {
        map.insert(key, value);
    }
    Ok(value)
}

impl<P: MarketDataProvider> MarketDataProvider for CachedProvider<P> {
    fn get_spot(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64> {
        read_through(&self.spots, (symbol.to_string(), as_of), || {
            self.inner.get_spot(symbol, as_of)
        })
    }

    fn get_option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        as_of: NaiveDate,
    ) -> EngineResult<OptionChain> {
        self.inner.get_option_chain(symbol, expiry, as_of)
    }

    fn get_historical_volatility(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        window_days: usize,
    ) -> EngineResult<f64> {
        read_through(
            &self.historical_vols,
            (symbol.to_string(), as_of, window_days),
            || self.inner.get_historical_volatility(symbol, as_of, window_days),
        )
    }

    fn get_dividend_yield(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64> {
        read_through(&self.dividend_yields, (symbol.to_string(), as_of), || {
            self.inner.get_dividend_yield(symbol, as_of)
        })
    }
}
