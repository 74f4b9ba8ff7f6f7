use crate::config::ScanConfig;
use crate::errors::EngineResult;
use crate::factor::evaluate_date;
use crate::feeds::MarketDataProvider;
use crate::sink::OutputSink;
use crate::types::{ScanResult, ScanRow};

/// Repeats the per-date factor over every calendar day in [start, end].
///
/// Dates with no data are skipped; configuration errors abort the scan.
pub struct RangeScanner<'a, P: MarketDataProvider + ?Sized> {
    provider: &'a P,
    config: &'a ScanConfig,
}

/// A range scan plus how many dates had no data.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeReport {
    pub result: ScanResult,
    /// Dates that produced a factor, even an empty one.
    pub served: usize,
    pub skipped: usize,
    /// Reason the most recent skipped date gave.
    pub last_skip: Option<String>,
}

impl RangeReport {
    /// True when not a single date in the range had data.
    pub fn no_data(&self) -> bool {
        self.served == 0
    }
}

impl<'a, P: MarketDataProvider + ?Sized> RangeScanner<'a, P> {
    pub fn new(provider: &'a P, config: &'a ScanConfig) -> Self {
        Self { provider, config }
    }

    pub fn scan(&self, symbol: &str, sink: Option<&mut dyn OutputSink>) -> EngineResult<ScanResult> {
        let report = self.report(symbol)?;
        if let Some(sink) = sink {
            sink.write(&report.result.table_rows())?;
        }
        Ok(report.result)
    }

    /// Scan without persisting and keep the served/skipped tally.
    pub fn report(&self, symbol: &str) -> EngineResult<RangeReport> {
        self.config.validate()?;

        let mut rows: Vec<ScanRow> = Vec::new();
        let mut served = 0usize;
        let mut skipped = 0usize;
        let mut last_skip = None;
        let mut fallbacks = 0usize;

        for date in self
            .config
            .start
            .iter_days()
            .take_while(|d| *d <= self.config.end)
        {
            match evaluate_date(self.provider, symbol, date, self.config) {
                Ok(day) => {
                    served += 1;
                    fallbacks += day.fallbacks.len();
                    rows.extend(day.records.into_iter().map(|record| ScanRow {
                        valuation_date: day.valuation_date,
                        record,
                    }));
                }
                Err(e) if e.is_data_unavailable() => {
                    skipped += 1;
                    tracing::debug!(symbol = %symbol, date = %date, reason = %e, "date skipped");
                    last_skip = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        let result = ScanResult::new(symbol, self.config.factor, rows);
        tracing::debug!(
            symbol = %symbol,
            rows = result.len(),
            served,
            skipped,
            fallbacks,
            "range scan finished"
        );

        Ok(RangeReport {
            result,
            served,
            skipped,
            last_skip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PricingParams;
    use crate::errors::EngineError;
    use crate::factor::fixtures;
    use crate::feeds::memory::StaticMarketData;
    use crate::sink::VecSink;
    use crate::types::{FactorKind, VolatilityInput};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn config(start: NaiveDate, end: NaiveDate) -> ScanConfig {
        ScanConfig {
            expiry: fixtures::expiry(),
            start,
            end,
            factor: FactorKind::Call,
            weights: Default::default(),
            pricing: PricingParams {
                volatility: VolatilityInput::Flat(0.25),
                ..PricingParams::default()
            },
        }
    }

    /// Data on the 21st and 23rd only.
    fn provider() -> StaticMarketData {
        StaticMarketData::new()
            .with_spot("ACME", day(21), 100.0)
            .with_chain("ACME", day(21), fixtures::chain())
            .with_spot("ACME", day(23), 101.0)
            .with_chain("ACME", day(23), fixtures::chain())
    }

    #[test]
    fn test_missing_dates_skipped() {
        let provider = provider();
        let cfg = config(day(21), day(23));
        let result = RangeScanner::new(&provider, &cfg).scan("ACME", None).unwrap();
        let dates: Vec<NaiveDate> = result.rows.iter().map(|r| r.valuation_date).collect();
        assert_eq!(result.len(), 8);
        assert!(dates[..4].iter().all(|d| *d == day(21)));
        assert!(dates[4..].iter().all(|d| *d == day(23)));
        let first_day: Vec<f64> = result.rows[..4].iter().map(|r| r.record.strike()).collect();
        assert_eq!(first_day, vec![90.0, 95.0, 100.0, 105.0]);
    }

    #[test]
    fn test_no_data_anywhere_is_empty_not_error() {
        let provider = StaticMarketData::new();
        let cfg = config(day(1), day(5));
        let result = RangeScanner::new(&provider, &cfg).scan("ACME", None).unwrap();
        assert!(result.is_empty());

        let report = RangeScanner::new(&provider, &cfg).report("ACME").unwrap();
        assert!(report.no_data());
        assert_eq!(report.skipped, 5);
        assert!(report.last_skip.is_some());
    }

    #[test]
    fn test_report_counts_served_and_skipped_dates() {
        let provider = provider();
        let cfg = config(day(21), day(23));
        let report = RangeScanner::new(&provider, &cfg).report("ACME").unwrap();
        assert_eq!(report.served, 2);
        assert_eq!(report.skipped, 1);
        assert!(!report.no_data());
        assert_eq!(report.result.len(), 8);
    }

    #[test]
    fn test_configuration_error_aborts() {
        let provider = provider();
        let mut cfg = config(day(21), day(23));
        cfg.pricing.volatility = VolatilityInput::PerStrike(vec![0.2; 2]);
        let err = RangeScanner::new(&provider, &cfg).scan("ACME", None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)), "got {err}");

        let inverted = config(day(23), day(21));
        let err = RangeScanner::new(&provider, &inverted).scan("ACME", None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_junk_implied_vol_does_not_lose_the_range() {
        let mut junk = fixtures::chain();
        junk.puts.implied_vols[2] = Some(0.002);
        let provider = StaticMarketData::new()
            .with_spot("ACME", day(21), 100.0)
            .with_chain("ACME", day(21), fixtures::chain())
            .with_spot("ACME", day(22), 100.0)
            .with_chain("ACME", day(22), junk);
        let mut cfg = config(day(21), day(22));
        cfg.factor = FactorKind::Put;
        cfg.pricing.rate = 0.05;
        cfg.pricing.volatility = VolatilityInput::Unresolved;

        let result = RangeScanner::new(&provider, &cfg).scan("ACME", None).unwrap();
        assert_eq!(result.len(), 10);
        assert!(result.rows[..5].iter().all(|r| r.valuation_date == day(21)));
        let low_vol = &result.rows[7];
        assert_eq!(low_vol.valuation_date, day(22));
        assert_eq!(low_vol.record.strike(), 100.0);
    }

    #[test]
    fn test_sink_receives_rows() {
        let provider = provider();
        let cfg = config(day(21), day(22));
        let mut sink = VecSink::default();
        let result = RangeScanner::new(&provider, &cfg)
            .scan("ACME", Some(&mut sink))
            .unwrap();
        assert_eq!(sink.rows.len(), result.len());
        assert!(sink.rows.iter().all(|r| r.symbol == "ACME"));
    }
}
