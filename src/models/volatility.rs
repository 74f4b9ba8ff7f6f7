use crate::errors::{EngineError, EngineResult};
use crate::feeds::MarketDataProvider;
use crate::types::{FallbackWarning, ResolvedVolatility, VolSource, VolatilityInput};
use chrono::NaiveDate;
use smallvec::SmallVec;

/// Trailing window (trading days) for the historical-volatility fallback.
pub const HISTORICAL_VOL_WINDOW: usize = 60;

/// Annualization factor for daily returns.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Decides, per strike, which volatility feeds the pricer.
///
/// Precedence: per-strike array > flat scalar > market implied vol >
/// historical volatility. The historical fallback is fetched at most once per
/// invocation and reported through exactly one aggregated warning.
pub struct VolatilityResolver<'a, P: MarketDataProvider + ?Sized> {
    provider: &'a P,
    symbol: &'a str,
    as_of: NaiveDate,
}

impl<'a, P: MarketDataProvider + ?Sized> VolatilityResolver<'a, P> {
    pub fn new(provider: &'a P, symbol: &'a str, as_of: NaiveDate) -> Self {
        Self {
            provider,
            symbol,
            as_of,
        }
    }

    /// `implied` is the chain's IV column, aligned to `strikes`. It is only
    /// consulted when `input` is `Unresolved`.
    pub fn resolve(
        &self,
        strikes: &[f64],
        input: &VolatilityInput,
        implied: &[Option<f64>],
    ) -> EngineResult<ResolvedVolatility> {
        match input {
            VolatilityInput::PerStrike(values) => {
                if values.len() != strikes.len() {
                    return Err(EngineError::config(format!(
                        "per-strike volatility has {} entries but there are {} strikes",
                        values.len(),
                        strikes.len()
                    )));
                }
                if let Some(i) = values.iter().position(|v| v.is_nan()) {
                    return Err(EngineError::config(format!(
                        "per-strike volatility for strike {} is NaN",
                        strikes[i]
                    )));
                }
                Ok(ResolvedVolatility {
                    values: values.clone(),
                    sources: vec![VolSource::UserArray; strikes.len()],
                    fallback: None,
                })
            }
            VolatilityInput::Flat(sigma) => {
                if sigma.is_nan() {
                    return Err(EngineError::config("flat volatility is NaN"));
                }
                Ok(ResolvedVolatility {
                    values: vec![*sigma; strikes.len()],
                    sources: vec![VolSource::UserFlat; strikes.len()],
                    fallback: None,
                })
            }
            VolatilityInput::Unresolved => self.resolve_from_market(strikes, implied),
        }
    }

    fn resolve_from_market(
        &self,
        strikes: &[f64],
        implied: &[Option<f64>],
    ) -> EngineResult<ResolvedVolatility> {
        if implied.len() != strikes.len() {
            return Err(EngineError::config(format!(
                "implied vol column has {} entries but there are {} strikes",
                implied.len(),
                strikes.len()
            )));
        }

        let mut values = Vec::with_capacity(strikes.len());
        let mut sources = Vec::with_capacity(strikes.len());
        let mut missing: SmallVec<[usize; 8]> = SmallVec::new();

        for (i, &iv) in implied.iter().enumerate() {
            match normalize_iv(iv) {
                Some(v) => {
                    values.push(v);
                    sources.push(VolSource::MarketImplied);
                }
                None => {
                    values.push(f64::NAN);
                    sources.push(VolSource::HistoricalFallback);
                    missing.push(i);
                }
            }
        }

        if missing.is_empty() {
            return Ok(ResolvedVolatility {
                values,
                sources,
                fallback: None,
            });
        }

        let first = strikes[missing[0]];
        let hist_vol = match self
            .provider
            .get_historical_volatility(self.symbol, self.as_of, HISTORICAL_VOL_WINDOW)
        {
            Ok(v) if v.is_finite() && v > 0.0 => v,
            Ok(v) => {
                return Err(EngineError::unavailable(format!(
                    "{} {}: no implied vol for strike {first} and historical volatility is {v}",
                    self.symbol, self.as_of
                )))
            }
            Err(e) => {
                return Err(EngineError::unavailable(format!(
                    "{} {}: no implied vol for strike {first} and historical volatility unavailable ({e})",
                    self.symbol, self.as_of
                )))
            }
        };

        for &i in &missing {
            values[i] = hist_vol;
        }

        let warning = FallbackWarning {
            symbol: self.symbol.to_string(),
            as_of: self.as_of,
            historical_vol: hist_vol,
            strikes: missing.iter().map(|&i| strikes[i]).collect(),
        };

        tracing::warn!(
            symbol = %self.symbol,
            as_of = %self.as_of,
            strikes = ?warning.strikes.as_slice(),
            historical_vol = hist_vol,
            "implied vol missing; falling back to historical volatility"
        );

        Ok(ResolvedVolatility {
            values,
            sources,
            fallback: Some(warning),
        })
    }
}

/// Usable implied vol or None. Values above 1.0 are quoted in percent.
#[inline]
pub fn normalize_iv(iv: Option<f64>) -> Option<f64> {
    iv.filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| if v > 1.0 { v / 100.0 } else { v })
}

/// Annualized volatility of simple daily returns over the trailing `window`.
///
/// Uses the last `window + 1` closes. Returns None with fewer than two returns
/// or on non-positive prices.
pub fn historical_volatility(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < 3 {
        return None;
    }
    let start = closes.len().saturating_sub(window + 1);
    let tail = &closes[start..];
    if tail.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return None;
    }

    let returns: SmallVec<[f64; 64]> = tail.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    let std = sample_std(&returns)?;
    Some(std * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Sample standard deviation (n - 1 denominator). No allocation.
#[inline]
fn sample_std(data: &[f64]) -> Option<f64> {
    let n = data.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean = data.iter().sum::<f64>() / nf;
    let var_sum: f64 = data.iter().map(|x| (x - mean) * (x - mean)).sum();
    Some((var_sum / (nf - 1.0)).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::OptionChain;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves only historical volatility; counts how often it is asked.
    struct HistOnly {
        vol: Option<f64>,
        calls: AtomicUsize,
    }

    impl HistOnly {
        fn new(vol: Option<f64>) -> Self {
            Self { vol, calls: AtomicUsize::new(0) }
        }
    }

    impl MarketDataProvider for HistOnly {
        fn get_spot(&self, _: &str, _: NaiveDate) -> EngineResult<f64> {
            Err(EngineError::unavailable("no spot"))
        }

        fn get_option_chain(&self, _: &str, _: NaiveDate, _: NaiveDate) -> EngineResult<OptionChain> {
            Err(EngineError::unavailable("no chain"))
        }

        fn get_historical_volatility(&self, _: &str, _: NaiveDate, window: usize) -> EngineResult<f64> {
            assert_eq!(window, HISTORICAL_VOL_WINDOW);
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.vol.ok_or_else(|| EngineError::unavailable("no history"))
        }
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 21).unwrap()
    }

    const STRIKES: [f64; 5] = [90.0, 95.0, 100.0, 105.0, 110.0];

    #[test]
    fn test_per_strike_length_mismatch_is_configuration_error() {
        let provider = HistOnly::new(Some(0.3));
        let resolver = VolatilityResolver::new(&provider, "AAPL", as_of());
        let input = VolatilityInput::PerStrike(vec![0.2, 0.2]);
        let err = resolver.resolve(&STRIKES, &input, &[None; 5]).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)), "got {err}");
    }

    #[test]
    fn test_per_strike_used_verbatim() {
        let provider = HistOnly::new(None);
        let resolver = VolatilityResolver::new(&provider, "AAPL", as_of());
        let vols = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let out = resolver
            .resolve(&STRIKES, &VolatilityInput::PerStrike(vols.clone()), &[None; 5])
            .unwrap();
        assert_eq!(out.values, vols);
        assert!(out.sources.iter().all(|s| *s == VolSource::UserArray));
        assert!(out.fallback.is_none());
    }

    #[test]
    fn test_flat_broadcast_ignores_market() {
        let provider = HistOnly::new(None);
        let resolver = VolatilityResolver::new(&provider, "AAPL", as_of());
        let out = resolver
            .resolve(&STRIKES, &VolatilityInput::Flat(0.25), &[Some(0.4); 5])
            .unwrap();
        assert_eq!(out.values, vec![0.25; 5]);
        assert!(out.sources.iter().all(|s| *s == VolSource::UserFlat));
        assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_all_implied_present_no_warning() {
        let provider = HistOnly::new(Some(0.3));
        let resolver = VolatilityResolver::new(&provider, "AAPL", as_of());
        let implied = [Some(0.21), Some(0.22), Some(0.23), Some(0.24), Some(0.25)];
        let out = resolver.resolve(&STRIKES, &VolatilityInput::Unresolved, &implied).unwrap();
        assert!(out.fallback.is_none());
        assert_eq!(out.fallback_count(), 0);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 0, "history must not be fetched");
    }

    #[test]
    fn test_one_missing_iv_yields_one_warning_naming_it() {
        let provider = HistOnly::new(Some(0.31));
        let resolver = VolatilityResolver::new(&provider, "AAPL", as_of());
        let implied = [Some(0.21), Some(0.22), None, Some(0.24), Some(0.25)];
        let out = resolver.resolve(&STRIKES, &VolatilityInput::Unresolved, &implied).unwrap();

        assert_eq!(out.fallback_count(), 1);
        assert_eq!(out.values[2], 0.31);
        assert_eq!(out.sources[2], VolSource::HistoricalFallback);
        let warning = out.fallback.expect("one aggregated warning");
        assert_eq!(warning.strikes.as_slice(), &[100.0]);
        assert_eq!(warning.historical_vol, 0.31);
    }

    #[test]
    fn test_several_missing_aggregate_into_single_fetch() {
        let provider = HistOnly::new(Some(0.3));
        let resolver = VolatilityResolver::new(&provider, "AAPL", as_of());
        let implied = [None, Some(0.0), Some(f64::NAN), Some(-0.1), Some(0.25)];
        let out = resolver.resolve(&STRIKES, &VolatilityInput::Unresolved, &implied).unwrap();
        let warning = out.fallback.unwrap();
        assert_eq!(warning.strikes.as_slice(), &[90.0, 95.0, 100.0, 105.0]);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
        assert_eq!(out.values, vec![0.3, 0.3, 0.3, 0.3, 0.25]);
    }

    #[test]
    fn test_missing_history_is_data_unavailable_naming_strike() {
        let provider = HistOnly::new(None);
        let resolver = VolatilityResolver::new(&provider, "AAPL", as_of());
        let implied = [Some(0.2), None, Some(0.2), Some(0.2), Some(0.2)];
        let err = resolver.resolve(&STRIKES, &VolatilityInput::Unresolved, &implied).unwrap_err();
        assert!(err.is_data_unavailable(), "got {err}");
        assert!(err.to_string().contains("95"), "error should name strike 95: {err}");
    }

    #[test]
    fn test_percent_quoted_iv_normalized() {
        assert_eq!(normalize_iv(Some(45.0)), Some(0.45));
        assert_eq!(normalize_iv(Some(0.45)), Some(0.45));
        assert_eq!(normalize_iv(Some(0.0)), None);
        assert_eq!(normalize_iv(None), None);
    }

    #[test]
    fn test_historical_volatility_constant_growth_is_zero() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let vol = historical_volatility(&closes, HISTORICAL_VOL_WINDOW).unwrap();
        assert!(vol < 1e-10, "constant returns should have ~zero vol, got {vol}");
    }

    #[test]
    fn test_historical_volatility_alternating_returns() {
        // +1% / -1% alternating: sample std of returns ~ 0.01
        let mut closes = vec![100.0];
        for i in 0..70 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last * 1.01 } else { last * 0.99 });
        }
        let vol = historical_volatility(&closes, HISTORICAL_VOL_WINDOW).unwrap();
        let expected = 0.01 * (60.0_f64 / 59.0).sqrt() * 252.0_f64.sqrt();
        assert!((vol - expected).abs() < 1e-9, "vol={vol} expected={expected}");
    }

    #[test]
    fn test_historical_volatility_too_short() {
        assert!(historical_volatility(&[100.0, 101.0], 60).is_none());
        assert!(historical_volatility(&[100.0, 0.0, 101.0], 60).is_none());
    }
}
