use super::range::RangeScanner;
use crate::config::{ScanConfig, DEFAULT_MAX_WORKERS};
use crate::errors::{EngineError, EngineResult, ErrorKind};
use crate::feeds::MarketDataProvider;
use crate::sink::OutputSink;
use crate::types::{BatchResult, TickerFailure, TickerOutcome};
use portable_atomic::{AtomicU64, Ordering};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Runs one range scan per ticker on a bounded pool of blocking workers.
///
/// Each worker reports `(ticker, outcome)` over a channel; the coordinator
/// folds them into a ticker-ordered map. A failing or panicking ticker is
/// recorded and never cancels its siblings.
pub struct BatchRunner<P: MarketDataProvider + ?Sized + 'static> {
    provider: Arc<P>,
    config: Arc<ScanConfig>,
    max_workers: usize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl<P: MarketDataProvider + ?Sized + 'static> BatchRunner<P> {
    pub fn new(provider: Arc<P>, config: ScanConfig, max_workers: usize) -> EngineResult<Self> {
        if max_workers < 1 {
            return Err(EngineError::config("max_workers must be >= 1"));
        }
        Ok(Self {
            provider,
            config: Arc::new(config),
            max_workers,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn with_default_workers(provider: Arc<P>, config: ScanConfig) -> EngineResult<Self> {
        Self::new(provider, config, DEFAULT_MAX_WORKERS)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub async fn run(
        &self,
        tickers: &[String],
        sink: Option<&mut dyn OutputSink>,
    ) -> EngineResult<BatchResult> {
        self.config.validate()?;

        let unique: BTreeSet<String> = tickers
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let mut result = BatchResult::default();
        if unique.is_empty() {
            return Ok(result);
        }

        tracing::info!(tickers = unique.len(), workers = self.max_workers, "batch started");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let (tx, mut rx) = mpsc::channel::<(String, TickerOutcome)>(unique.len());

        for ticker in &unique {
            let ticker = ticker.clone();
            let provider = Arc::clone(&self.provider);
            let config = Arc::clone(&self.config);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();

            tokio::spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };

                let symbol = ticker.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    RangeScanner::new(&*provider, &config).report(&symbol)
                })
                .await;
                drop(permit);

                let outcome = match joined {
                    Ok(Ok(report)) if report.no_data() => TickerOutcome::Failed(TickerFailure {
                        kind: ErrorKind::DataUnavailable,
                        reason: report
                            .last_skip
                            .unwrap_or_else(|| "no data in range".to_string()),
                    }),
                    Ok(Ok(report)) => TickerOutcome::Completed(report.result),
                    Ok(Err(e)) => TickerOutcome::Failed(TickerFailure {
                        kind: e.kind(),
                        reason: e.to_string(),
                    }),
                    Err(join_err) => TickerOutcome::Failed(TickerFailure {
                        kind: ErrorKind::WorkerPanic,
                        reason: join_err.to_string(),
                    }),
                };

                if tx.send((ticker, outcome)).await.is_err() {
                    tracing::error!("batch coordinator gone, dropping worker result");
                }
            });
        }
        drop(tx);

        while let Some((ticker, outcome)) = rx.recv().await {
            self.record(&ticker, &outcome);
            result.outcomes.insert(ticker, outcome);
        }

        // A worker task that died before reporting still gets a marker.
        for ticker in unique {
            if !result.outcomes.contains_key(&ticker) {
                let outcome = TickerOutcome::Failed(TickerFailure {
                    kind: ErrorKind::WorkerPanic,
                    reason: "worker exited without reporting".to_string(),
                });
                self.record(&ticker, &outcome);
                result.outcomes.insert(ticker, outcome);
            }
        }

        tracing::info!(
            completed = self.completed(),
            failed = self.failed(),
            "batch finished"
        );

        if let Some(sink) = sink {
            sink.write(&result.table_rows())?;
        }
        Ok(result)
    }

    fn record(&self, ticker: &str, outcome: &TickerOutcome) {
        match outcome {
            TickerOutcome::Completed(scan) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(ticker = %ticker, rows = scan.len(), "ticker completed");
            }
            TickerOutcome::Failed(f) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ticker = %ticker, kind = ?f.kind, reason = %f.reason, "ticker failed");
            }
        }
    }
}
