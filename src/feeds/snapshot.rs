use super::{mid_price, ChainSide, MarketDataProvider, OptionChain};
use crate::errors::{EngineError, EngineResult};
use crate::models::volatility::historical_volatility;
use crate::types::OptionKind;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Market data read from a directory of CSV snapshots:
///
/// ```text
/// {root}/{SYMBOL}/closes.csv                      date,close
/// {root}/{SYMBOL}/dividends.csv      (optional)   date,amount
/// {root}/{SYMBOL}/{AS_OF}/chain_{EXPIRY}.csv      kind,strike,bid,ask,implied_volatility
/// ```
///
/// Market price is the bid/ask mid when both sides are positive. When the
/// requested expiry has no file the nearest listed one is served.
#[derive(Debug, Clone)]
pub struct CsvSnapshotProvider {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CloseRow {
    date: NaiveDate,
    close: f64,
}

#[derive(Debug, Deserialize)]
struct DividendRow {
    date: NaiveDate,
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct ChainRow {
    kind: OptionKind,
    strike: f64,
    bid: Option<f64>,
    ask: Option<f64>,
    implied_volatility: Option<f64>,
}

impl CsvSnapshotProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(symbol.to_ascii_uppercase())
    }

    /// Closes on or before `as_of`, oldest first.
    fn closes_until(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<Vec<f64>> {
        let path = self.symbol_dir(symbol).join("closes.csv");
        let mut rows: Vec<CloseRow> = read_rows(&path)?;
        rows.retain(|r| r.date <= as_of && r.close.is_finite());
        rows.sort_by_key(|r| r.date);
        Ok(rows.into_iter().map(|r| r.close).collect())
    }

    /// Expiry dates with a chain file under `{SYMBOL}/{AS_OF}`.
    fn listed_expiries(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<Vec<NaiveDate>> {
        let dir = self.symbol_dir(symbol).join(as_of.to_string());
        let entries = fs::read_dir(&dir).map_err(|e| {
            EngineError::unavailable(format!("no chain snapshot at {}: {e}", dir.display()))
        })?;

        let mut expiries: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let stem = name.strip_prefix("chain_")?.strip_suffix(".csv")?;
                NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
            })
            .collect();
        expiries.sort();
        Ok(expiries)
    }
}

impl MarketDataProvider for CsvSnapshotProvider {
    fn get_spot(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64> {
        self.closes_until(symbol, as_of)?
            .last()
            .copied()
            .filter(|c| *c > 0.0)
            .ok_or_else(|| EngineError::unavailable(format!("no close for {symbol} on or before {as_of}")))
    }

    fn get_option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        as_of: NaiveDate,
    ) -> EngineResult<OptionChain> {
        let listed = self.listed_expiries(symbol, as_of)?;
        let chosen = nearest_expiry(&listed, expiry).ok_or_else(|| {
            EngineError::unavailable(format!("no option expiries listed for {symbol} on {as_of}"))
        })?;
        if chosen != expiry {
            tracing::info!(
                symbol = %symbol,
                requested = %expiry,
                served = %chosen,
                "expiry not listed; using nearest"
            );
        }

        let path = self
            .symbol_dir(symbol)
            .join(as_of.to_string())
            .join(format!("chain_{chosen}.csv"));
        let rows: Vec<ChainRow> = read_rows(&path)?;

        let mut chain = OptionChain {
            expiry: Some(chosen),
            ..OptionChain::default()
        };
        for row in rows {
            let side: &mut ChainSide = match row.kind {
                OptionKind::Call => &mut chain.calls,
                OptionKind::Put => &mut chain.puts,
            };
            side.push(row.strike, mid_price(row.bid, row.ask), row.implied_volatility);
        }
        Ok(chain)
    }

    fn get_historical_volatility(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        window_days: usize,
    ) -> EngineResult<f64> {
        let closes = self.closes_until(symbol, as_of)?;
        historical_volatility(&closes, window_days).ok_or_else(|| {
            EngineError::unavailable(format!(
                "{symbol}: {} closes before {as_of} is not enough history",
                closes.len()
            ))
        })
    }

    /// Trailing 365-day cash dividends over spot. No dividend file means no dividend.
    fn get_dividend_yield(&self, symbol: &str, as_of: NaiveDate) -> EngineResult<f64> {
        let path = self.symbol_dir(symbol).join("dividends.csv");
        if !path.exists() {
            return Ok(0.0);
        }
        let rows: Vec<DividendRow> = read_rows(&path)?;
        let since = as_of - Duration::days(365);
        let paid: f64 = rows
            .iter()
            .filter(|r| r.date > since && r.date <= as_of)
            .map(|r| r.amount)
            .sum();
        if paid <= 0.0 {
            return Ok(0.0);
        }
        Ok(paid / self.get_spot(symbol, as_of)?)
    }
}

/// The requested expiry if listed, else the closest one (earlier wins ties).
fn nearest_expiry(listed: &[NaiveDate], requested: NaiveDate) -> Option<NaiveDate> {
    listed
        .iter()
        .copied()
        .min_by_key(|d| ((*d - requested).num_days().abs(), *d))
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> EngineResult<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| EngineError::unavailable(format!("{}: {e}", path.display())))?;

    reader
        .deserialize::<T>()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| EngineError::unavailable(format!("{}: {e}", path.display())))
}
