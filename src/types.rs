use crate::errors::{EngineError, EngineResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Calendar days per year used to turn (expiry - valuation date) into T.
pub const DAYS_PER_YEAR: f64 = 365.0;

// ── Contract description ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    #[serde(alias = "c", alias = "C", alias = "Call")]
    Call,
    #[serde(alias = "p", alias = "P", alias = "Put")]
    Put,
}

impl OptionKind {
    /// +1 for calls, -1 for puts.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Self::Call => 1.0,
            Self::Put => -1.0,
        }
    }

    #[inline]
    pub fn intrinsic(self, spot: f64, strike: f64) -> f64 {
        (self.sign() * (spot - strike)).max(0.0)
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

impl FromStr for OptionKind {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "call" => Ok(Self::Call),
            "p" | "put" => Ok(Self::Put),
            other => Err(EngineError::config(format!(
                "option kind must be 'call' or 'put', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStyle {
    American,
    European,
}

impl ExerciseStyle {
    #[inline]
    pub fn from_american(american: bool) -> Self {
        if american {
            Self::American
        } else {
            Self::European
        }
    }

    #[inline]
    pub fn is_american(self) -> bool {
        matches!(self, Self::American)
    }
}

/// One option contract priced against one spot/rate/dividend environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionSpec {
    pub spot: f64,
    pub strike: f64,
    pub expiry_years: f64,
    pub rate: f64,
    pub dividend_yield: f64,
    pub kind: OptionKind,
    pub style: ExerciseStyle,
}

impl OptionSpec {
    pub fn validate(&self) -> EngineResult<()> {
        self.market().validate()?;
        if !(self.strike.is_finite() && self.strike > 0.0) {
            return Err(EngineError::config(format!(
                "strike must be positive and finite, got {}",
                self.strike
            )));
        }
        Ok(())
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

/// Inputs shared by every strike of one pricing pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketInputs {
    pub spot: f64,
    pub expiry_years: f64,
    pub rate: f64,
    pub dividend_yield: f64,
}

impl MarketInputs {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.spot.is_finite() && self.spot > 0.0) {
            return Err(EngineError::config(format!(
                "spot must be positive and finite, got {}",
                self.spot
            )));
        }
        if self.expiry_years.is_nan() {
            return Err(EngineError::config("time to expiry is NaN"));
        }
        if !self.rate.is_finite() || !self.dividend_yield.is_finite() {
            return Err(EngineError::config("rate and dividend yield must be finite"));
        }
        Ok(())
    }

    /// T clipped at zero.
    #[inline]
    pub fn tau(&self) -> f64 {
        self.expiry_years.max(0.0)
    }

    /// Discounted forward intrinsic: max(sign * (S e^{-qT} - K e^{-rT}), 0).
    #[inline]
    pub fn discounted_intrinsic(&self, kind: OptionKind, strike: f64) -> f64 {
        let t = self.tau();
        let fwd_spot = self.spot * (-self.dividend_yield * t).exp();
        let pv_strike = strike * (-self.rate * t).exp();
        (kind.sign() * (fwd_spot - pv_strike)).max(0.0)
    }
}

/// Year fraction between valuation date and expiry, clipped to >= 0.
pub fn expiry_years(valuation_date: NaiveDate, expiry: NaiveDate) -> f64 {
    let days = (expiry - valuation_date).num_days();
    (days.max(0) as f64) / DAYS_PER_YEAR
}

// ── Volatility ──

/// Caller-supplied volatility. Resolved once into a per-strike array before pricing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VolatilityInput {
    Flat(f64),
    PerStrike(Vec<f64>),
    #[default]
    Unresolved,
}

impl VolatilityInput {
    /// A per-strike array wins over a flat scalar; neither means "ask the market".
    pub fn from_overrides(flat: Option<f64>, per_strike: Option<Vec<f64>>) -> Self {
        match (per_strike, flat) {
            (Some(values), _) => Self::PerStrike(values),
            (None, Some(sigma)) => Self::Flat(sigma),
            (None, None) => Self::Unresolved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolSource {
    UserFlat,
    UserArray,
    MarketImplied,
    HistoricalFallback,
}

/// The one aggregated warning a resolver invocation emits when it falls back
/// to historical volatility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackWarning {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub historical_vol: f64,
    pub strikes: SmallVec<[f64; 8]>,
}

impl fmt::Display for FallbackWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: implied vol missing for strikes {:?}; using historical vol {:.4}",
            self.symbol,
            self.as_of,
            self.strikes.as_slice(),
            self.historical_vol
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVolatility {
    pub values: Vec<f64>,
    pub sources: Vec<VolSource>,
    pub fallback: Option<FallbackWarning>,
}

impl ResolvedVolatility {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn fallback_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| **s == VolSource::HistoricalFallback)
            .count()
    }
}

// ── Pricing output ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Binomial,
    BlackScholes,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binomial => write!(f, "binomial"),
            Self::BlackScholes => write!(f, "black_scholes"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binomial" | "tree" | "crr" => Ok(Self::Binomial),
            "black_scholes" | "bs" | "blackscholes" => Ok(Self::BlackScholes),
            other => Err(EngineError::config(format!("unknown pricing model '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceResult {
    pub strike: f64,
    pub theoretical_price: f64,
    pub model: ModelKind,
    pub volatility: f64,
    pub vol_source: VolSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MispricingRecord {
    pub strike: f64,
    pub market_price: f64,
    pub theoretical_price: f64,
    /// market - theoretical
    pub mispricing: f64,
    /// mispricing / theoretical; None when theoretical <= 0
    pub percent_mispricing: Option<f64>,
    pub volatility: f64,
    pub vol_source: VolSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompositeRecord {
    pub strike: f64,
    pub call: MispricingRecord,
    pub put: MispricingRecord,
    pub call_weight: f64,
    pub put_weight: f64,
    /// w_call * call.mispricing + w_put * put.mispricing
    pub composite: f64,
    pub market_composite: f64,
    pub theoretical_composite: f64,
    pub composite_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactorRecord {
    Single(MispricingRecord),
    Composite(CompositeRecord),
}

impl FactorRecord {
    #[inline]
    pub fn strike(&self) -> f64 {
        match self {
            Self::Single(r) => r.strike,
            Self::Composite(r) => r.strike,
        }
    }

    /// The signed signal: plain mispricing or the weighted composite.
    #[inline]
    pub fn signal(&self) -> f64 {
        match self {
            Self::Single(r) => r.mispricing,
            Self::Composite(r) => r.composite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorKind {
    Call,
    Put,
    #[default]
    Composite,
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

impl FromStr for FactorKind {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "call" | "c" => Ok(Self::Call),
            "put" | "p" => Ok(Self::Put),
            "composite" => Ok(Self::Composite),
            other => Err(EngineError::config(format!(
                "factor must be 'call', 'put', or 'composite', got '{other}'"
            ))),
        }
    }
}

// ── Scan / batch results ──

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanRow {
    pub valuation_date: NaiveDate,
    pub record: FactorRecord,
}

/// Rows for one symbol ordered by (valuation date, strike).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub symbol: String,
    pub factor: FactorKind,
    pub rows: Vec<ScanRow>,
}

impl ScanResult {
    pub fn new(symbol: impl Into<String>, factor: FactorKind, mut rows: Vec<ScanRow>) -> Self {
        rows.sort_by(|a, b| {
            a.valuation_date
                .cmp(&b.valuation_date)
                .then_with(|| a.record.strike().total_cmp(&b.record.strike()))
        });
        Self {
            symbol: symbol.into(),
            factor,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn table_rows(&self) -> Vec<TableRow> {
        self.rows
            .iter()
            .map(|row| TableRow::from_scan_row(&self.symbol, row))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerFailure {
    pub kind: crate::errors::ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickerOutcome {
    Completed(ScanResult),
    Failed(TickerFailure),
}

impl TickerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Per-ticker outcomes. The BTreeMap keeps tickers in a stable order
/// regardless of which worker finished first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub outcomes: BTreeMap<String, TickerOutcome>,
}

impl BatchResult {
    pub fn successes(&self) -> impl Iterator<Item = (&str, &ScanResult)> {
        self.outcomes.iter().filter_map(|(t, o)| match o {
            TickerOutcome::Completed(scan) => Some((t.as_str(), scan)),
            TickerOutcome::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &TickerFailure)> {
        self.outcomes.iter().filter_map(|(t, o)| match o {
            TickerOutcome::Failed(f) => Some((t.as_str(), f)),
            TickerOutcome::Completed(_) => None,
        })
    }

    /// All successful rows, ordered by ticker then by each scan's own order.
    pub fn table_rows(&self) -> Vec<TableRow> {
        self.successes()
            .flat_map(|(_, scan)| scan.table_rows())
            .collect()
    }
}

/// Flat tabular row handed to output sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub strike: f64,
    pub market_price: f64,
    pub theoretical_price: f64,
    pub mispricing: f64,
    pub percent_mispricing: Option<f64>,
    pub call_market: Option<f64>,
    pub call_theoretical: Option<f64>,
    pub call_mispricing: Option<f64>,
    pub put_market: Option<f64>,
    pub put_theoretical: Option<f64>,
    pub put_mispricing: Option<f64>,
    pub composite: Option<f64>,
    pub valuation_date: NaiveDate,
    pub symbol: String,
}

impl TableRow {
    pub fn from_scan_row(symbol: &str, row: &ScanRow) -> Self {
        match &row.record {
            FactorRecord::Single(r) => Self {
                strike: r.strike,
                market_price: r.market_price,
                theoretical_price: r.theoretical_price,
                mispricing: r.mispricing,
                percent_mispricing: r.percent_mispricing,
                call_market: None,
                call_theoretical: None,
                call_mispricing: None,
                put_market: None,
                put_theoretical: None,
                put_mispricing: None,
                composite: None,
                valuation_date: row.valuation_date,
                symbol: symbol.to_string(),
            },
            FactorRecord::Composite(c) => Self {
                strike: c.strike,
                market_price: c.market_composite,
                theoretical_price: c.theoretical_composite,
                mispricing: c.market_composite - c.theoretical_composite,
                percent_mispricing: c.composite_percent,
                call_market: Some(c.call.market_price),
                call_theoretical: Some(c.call.theoretical_price),
                call_mispricing: Some(c.call.mispricing),
                put_market: Some(c.put.market_price),
                put_theoretical: Some(c.put.theoretical_price),
                put_mispricing: Some(c.put.mispricing),
                composite: Some(c.composite),
                valuation_date: row.valuation_date,
                symbol: symbol.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_expiry_years_clipped() {
        assert_eq!(expiry_years(date(2025, 5, 16), date(2025, 5, 1)), 0.0);
        let t = expiry_years(date(2025, 1, 1), date(2026, 1, 1));
        assert!((t - 1.0).abs() < 1e-12, "one calendar year should be 1.0, got {t}");
    }

    #[test]
    fn test_option_spec_validation() {
        let contract = OptionSpec {
            spot: 100.0,
            strike: 95.0,
            expiry_years: 0.25,
            rate: 0.01,
            dividend_yield: 0.0,
            kind: OptionKind::Put,
            style: ExerciseStyle::American,
        };
        assert!(contract.validate().is_ok());
        assert_eq!(contract.market().spot, 100.0);
        assert!(OptionSpec { strike: 0.0, ..contract }.validate().is_err());
        assert!(OptionSpec { spot: f64::NAN, ..contract }.validate().is_err());
    }

    #[test]
    fn test_from_overrides_precedence() {
        let both = VolatilityInput::from_overrides(Some(0.3), Some(vec![0.1, 0.2]));
        assert_eq!(both, VolatilityInput::PerStrike(vec![0.1, 0.2]));
        assert_eq!(VolatilityInput::from_overrides(Some(0.3), None), VolatilityInput::Flat(0.3));
        assert_eq!(VolatilityInput::from_overrides(None, None), VolatilityInput::Unresolved);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("c".parse::<OptionKind>().unwrap(), OptionKind::Call);
        assert_eq!("Put".parse::<OptionKind>().unwrap(), OptionKind::Put);
        assert!("straddle".parse::<OptionKind>().is_err());
        assert!("spread".parse::<FactorKind>().is_err());
    }

    #[test]
    fn test_scan_result_sorted_by_date_then_strike() {
        let rec = |strike: f64| {
            FactorRecord::Single(MispricingRecord {
                strike,
                market_price: 1.0,
                theoretical_price: 1.0,
                mispricing: 0.0,
                percent_mispricing: Some(0.0),
                volatility: 0.2,
                vol_source: VolSource::UserFlat,
            })
        };
        let rows = vec![
            ScanRow { valuation_date: date(2025, 4, 22), record: rec(100.0) },
            ScanRow { valuation_date: date(2025, 4, 21), record: rec(110.0) },
            ScanRow { valuation_date: date(2025, 4, 21), record: rec(90.0) },
        ];
        let scan = ScanResult::new("AAPL", FactorKind::Call, rows);
        let keys: Vec<_> = scan
            .rows
            .iter()
            .map(|r| (r.valuation_date, r.record.strike()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (date(2025, 4, 21), 90.0),
                (date(2025, 4, 21), 110.0),
                (date(2025, 4, 22), 100.0)
            ]
        );
    }
}
