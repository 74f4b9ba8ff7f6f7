use lattice_misprice::api;
use lattice_misprice::config::{AppConfig, Mode};
use lattice_misprice::errors::{EngineError, EngineResult};
use lattice_misprice::feeds::cache::CachedProvider;
use lattice_misprice::feeds::snapshot::CsvSnapshotProvider;
use lattice_misprice::sink::csv::CsvSink;
use lattice_misprice::sink::sqlite::SqliteSink;
use lattice_misprice::sink::{MultiSink, OutputSink};
use lattice_misprice::types::{
    FactorKind, FactorRecord, MarketInputs, ScanResult, ScanRow, TickerOutcome,
};
use serde::Serialize;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(mode = ?cfg.mode, model = %cfg.pricing.model, "lattice_misprice starting");

    if let Err(e) = run(&cfg).await {
        tracing::error!(kind = ?e.kind(), "{e}");
        std::process::exit(1);
    }
}

async fn run(cfg: &AppConfig) -> EngineResult<()> {
    let mut sink = open_sinks(cfg)?;
    let provider = Arc::new(CachedProvider::new(CsvSnapshotProvider::new(&cfg.data_dir)));

    match cfg.mode {
        Mode::Tree | Mode::BlackScholes => {
            let market = MarketInputs {
                spot: cfg
                    .spot
                    .ok_or_else(|| EngineError::Configuration("missing env var: SPOT".into()))?,
                expiry_years: cfg
                    .expiry_years
                    .ok_or_else(|| EngineError::Configuration("missing env var: EXPIRY_YEARS".into()))?,
                rate: cfg.pricing.rate,
                dividend_yield: cfg.pricing.dividend_yield.unwrap_or(0.0),
            };
            let kind = cfg.require_option_kind()?;
            let prices = if cfg.mode == Mode::Tree {
                api::price_tree(
                    &market,
                    &cfg.strikes,
                    &cfg.pricing.volatility,
                    kind,
                    cfg.pricing.steps,
                    cfg.pricing.american,
                )?
            } else {
                api::price_black_scholes(
                    &market,
                    &cfg.strikes,
                    &cfg.pricing.volatility,
                    kind,
                    cfg.pricing.american,
                )?
            };
            print_json_lines(&prices)?;
        }
        Mode::Call | Mode::Put | Mode::Composite => {
            let symbol = cfg.require_symbol()?;
            let expiry = cfg.require_expiry()?;
            let date = cfg.valuation_date;
            let (factor, records): (FactorKind, Vec<FactorRecord>) = match cfg.mode {
                Mode::Call => {
                    let pass = api::call_mispricing(&*provider, symbol, expiry, date, &cfg.pricing)?;
                    (FactorKind::Call, pass.records.into_iter().map(FactorRecord::Single).collect())
                }
                Mode::Put => {
                    let pass = api::put_mispricing(&*provider, symbol, expiry, date, &cfg.pricing)?;
                    (FactorKind::Put, pass.records.into_iter().map(FactorRecord::Single).collect())
                }
                _ => {
                    let pass = api::composite_mispricing(
                        &*provider,
                        symbol,
                        expiry,
                        date,
                        &cfg.pricing,
                        cfg.weights,
                    )?;
                    (
                        FactorKind::Composite,
                        pass.records.into_iter().map(FactorRecord::Composite).collect(),
                    )
                }
            };
            let rows = records
                .into_iter()
                .map(|record| ScanRow { valuation_date: date, record })
                .collect();
            let result = ScanResult::new(symbol, factor, rows);
            emit(&result, sink.as_mut())?;
        }
        Mode::Range => {
            let symbol = cfg.require_symbol()?;
            let scan_cfg = cfg.scan_config()?;
            let result = api::range_scan(&*provider, symbol, &scan_cfg, None)?;
            emit(&result, sink.as_mut())?;
        }
        Mode::Batch => {
            if cfg.tickers.is_empty() {
                return Err(EngineError::Configuration("missing env var: TICKERS".into()));
            }
            let scan_cfg = cfg.scan_config()?;
            let batch = api::batch_scan(
                Arc::clone(&provider),
                &cfg.tickers,
                scan_cfg,
                cfg.max_workers,
                sink.as_mut().map(|s| s as &mut dyn OutputSink),
            )
            .await?;
            print_json_lines(&batch.table_rows())?;
            for (ticker, outcome) in &batch.outcomes {
                if let TickerOutcome::Failed(f) = outcome {
                    tracing::warn!(ticker = %ticker, kind = ?f.kind, "{}", f.reason);
                }
            }
        }
    }
    Ok(())
}

fn open_sinks(cfg: &AppConfig) -> EngineResult<Option<MultiSink>> {
    let mut sinks = MultiSink::default();
    if let Some(path) = &cfg.output_path {
        sinks.push(Box::new(CsvSink::create(path)?));
    }
    if let Some(path) = &cfg.db_path {
        let db = SqliteSink::open(path)?;
        tracing::info!(run_id = %db.run_id(), "writing rows to sqlite");
        sinks.push(Box::new(db));
    }
    Ok((!sinks.is_empty()).then_some(sinks))
}

fn emit(result: &ScanResult, sink: Option<&mut MultiSink>) -> EngineResult<()> {
    let rows = result.table_rows();
    if let Some(sink) = sink {
        sink.write(&rows)?;
    }
    print_json_lines(&rows)
}

fn print_json_lines<T: Serialize>(items: &[T]) -> EngineResult<()> {
    use std::io::Write;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for item in items {
        writeln!(out, "{}", serde_json::to_string(item)?)?;
    }
    Ok(())
}
