use crate::error::FetchError;
use crate::features;
use crate::logging::Logger;
use crate::models::{Bar, FeatureRow, FeatureTable, FeatureWindows};
use crate::retriever::{KlineSource, Retriever};
use crate::snapshot::{BarSnapshot, SymbolBars};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Process symbols on the rayon pool. Each symbol still paginates sequentially.
    pub parallel: bool,
    pub show_progress: bool,
}

#[derive(Debug)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: FetchError,
}

#[derive(Debug)]
pub struct BatchReport {
    pub table: FeatureTable,
    pub succeeded: Vec<String>,
    pub failures: Vec<SymbolFailure>,
}

/// Retrieval followed by feature computation, per symbol.
pub struct Pipeline<S> {
    retriever: Retriever<S>,
    windows: FeatureWindows,
    logger: Logger,
}

impl<S: KlineSource + Sync> Pipeline<S> {
    pub fn new(retriever: Retriever<S>, windows: FeatureWindows, logger: Logger) -> Self {
        Self {
            retriever,
            windows,
            logger,
        }
    }

    pub fn windows(&self) -> FeatureWindows {
        self.windows
    }

    /// Retrieves one symbol, treating an empty history as unavailable data.
    pub fn retrieve(&self, symbol: &str, start_date: NaiveDate) -> Result<Vec<Bar>, FetchError> {
        let history = self.retriever.fetch_history(symbol, start_date)?;
        if history.bars.is_empty() {
            return Err(FetchError::DataUnavailable {
                symbol: symbol.to_string(),
                attempts: history.attempts,
                reason: format!("no history since {}", start_date),
            });
        }
        Ok(history.bars)
    }

    pub fn run_symbol(
        &self,
        symbol: &str,
        start_date: NaiveDate,
    ) -> Result<Vec<FeatureRow>, FetchError> {
        let bars = self.retrieve(symbol, start_date)?;
        Ok(features::compute_rows(symbol, &bars, self.windows))
    }

    /// Runs every symbol, skipping the ones that fail. Rows follow `symbols` order.
    pub fn run_batch(
        &self,
        symbols: &[String],
        start_date: NaiveDate,
        options: BatchOptions,
    ) -> BatchReport {
        let outcomes = self.for_each_symbol(symbols, options, |symbol| {
            self.run_symbol(symbol, start_date)
        });

        let mut table = FeatureTable::new(self.windows);
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(rows) => {
                    table.extend(rows);
                    succeeded.push(symbol);
                }
                Err(error) => failures.push(SymbolFailure { symbol, error }),
            }
        }

        self.logger.info(format_args!(
            "Computed {} feature rows for {}/{} symbols",
            table.len(),
            succeeded.len(),
            symbols.len()
        ));
        BatchReport {
            table,
            succeeded,
            failures,
        }
    }

    /// Retrieves every symbol without computing features, for snapshotting.
    pub fn fetch_batch(
        &self,
        symbols: &[String],
        start_date: NaiveDate,
        options: BatchOptions,
    ) -> (BarSnapshot, Vec<SymbolFailure>) {
        let outcomes =
            self.for_each_symbol(symbols, options, |symbol| self.retrieve(symbol, start_date));

        let mut series = Vec::new();
        let mut failures = Vec::new();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(bars) => series.push(SymbolBars { symbol, bars }),
                Err(error) => failures.push(SymbolFailure { symbol, error }),
            }
        }
        (BarSnapshot::new(start_date, series), failures)
    }

    fn for_each_symbol<T, F>(
        &self,
        symbols: &[String],
        options: BatchOptions,
        work: F,
    ) -> Vec<(String, Result<T, FetchError>)>
    where
        T: Send,
        F: Fn(&str) -> Result<T, FetchError> + Sync,
    {
        let progress = build_progress_bar(symbols.len(), options.show_progress);
        let run_one = |symbol: &String| {
            self.logger
                .info(format_args!("Fetching data for {}...", symbol));
            let outcome = work(symbol.as_str());
            if let Err(err) = &outcome {
                self.logger
                    .warn(format_args!("Skipping {}: {}", symbol, err));
            }
            progress.inc(1);
            (symbol.clone(), outcome)
        };

        // Indexed collect keeps the input order in both modes.
        let outcomes = if options.parallel {
            symbols.par_iter().map(run_one).collect()
        } else {
            symbols.iter().map(run_one).collect()
        };
        progress.finish_and_clear();
        outcomes
    }
}

/// Computes features for every series in a snapshot, in snapshot order.
pub fn features_from_snapshot(snapshot: &BarSnapshot, windows: FeatureWindows) -> FeatureTable {
    let mut table = FeatureTable::new(windows);
    for entry in &snapshot.series {
        table.extend(features::compute_rows(&entry.symbol, &entry.bars, windows));
    }
    table
}

fn build_progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::RawCandle;
    use crate::config::FetchSettings;
    use crate::retriever::PageRequest;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const DAY_MS: i64 = 86_400_000;
    const START_MS: i64 = 1_577_836_800_000;

    struct MultiSource {
        series: HashMap<String, Vec<RawCandle>>,
        fail_first: AtomicU32,
    }

    impl MultiSource {
        fn new(entries: &[(&str, usize)]) -> Self {
            let series = entries
                .iter()
                .map(|(symbol, days)| {
                    let rows = (0..*days)
                        .map(|i| {
                            let price = 10.0 + i as f64;
                            RawCandle::from_ohlc(
                                START_MS + i as i64 * DAY_MS,
                                price,
                                price + 1.0,
                                price - 1.0,
                                price,
                            )
                        })
                        .collect();
                    (symbol.to_string(), rows)
                })
                .collect();
            Self {
                series,
                fail_first: AtomicU32::new(0),
            }
        }

        fn failing_first(self, calls: u32) -> Self {
            self.fail_first.store(calls, Ordering::SeqCst);
            self
        }
    }

    impl KlineSource for MultiSource {
        fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError> {
            let failing = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(FetchError::transient(request.symbol, "HTTP 503 busy"));
            }
            let Some(rows) = self.series.get(request.symbol) else {
                return Err(FetchError::transient(request.symbol, "HTTP 400 invalid symbol"));
            };
            Ok(rows
                .iter()
                .filter(|row| row.open_time_ms().unwrap() >= request.start_ms)
                .take(request.limit)
                .cloned()
                .collect())
        }
    }

    fn pipeline(source: MultiSource) -> Pipeline<MultiSource> {
        let settings = FetchSettings {
            page_limit: 4,
            page_delay: Duration::ZERO,
            retry_attempts: 2,
            retry_delay: Duration::ZERO,
        };
        Pipeline::new(
            Retriever::new(source, settings, Logger::discard()),
            FeatureWindows::new(3, 2).unwrap(),
            Logger::discard(),
        )
    }

    fn symbols(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    #[test]
    fn failing_symbol_does_not_abort_batch() {
        let pipeline = pipeline(MultiSource::new(&[("BTCUSDT", 10), ("ETHUSDT", 6)]));
        let report = pipeline.run_batch(
            &symbols(&["BTCUSDT", "BADPAIR", "ETHUSDT"]),
            start(),
            BatchOptions::default(),
        );

        assert_eq!(report.succeeded, symbols(&["BTCUSDT", "ETHUSDT"]));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].symbol, "BADPAIR");
        assert!(matches!(
            report.failures[0].error,
            FetchError::DataUnavailable { attempts: 2, .. }
        ));
        assert_eq!(report.table.len(), 16);
        assert!(report.table.rows[..10].iter().all(|r| r.symbol == "BTCUSDT"));
        assert!(report.table.rows[10..].iter().all(|r| r.symbol == "ETHUSDT"));
    }

    #[test]
    fn empty_history_is_reported_as_unavailable() {
        let pipeline = pipeline(MultiSource::new(&[("NEWUSDT", 0)]));
        let err = pipeline.run_symbol("NEWUSDT", start()).unwrap_err();
        match err {
            FetchError::DataUnavailable {
                symbol,
                attempts,
                reason,
            } => {
                assert_eq!(symbol, "NEWUSDT");
                assert_eq!(attempts, 1);
                assert!(reason.contains("no history"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_history_carries_the_attempts_it_took() {
        let pipeline = pipeline(MultiSource::new(&[("NEWUSDT", 0)]).failing_first(1));
        let err = pipeline.retrieve("NEWUSDT", start()).unwrap_err();
        assert!(matches!(
            err,
            FetchError::DataUnavailable { attempts: 2, .. }
        ));
    }

    #[test]
    fn parallel_batch_matches_sequential_order() {
        let entries = [
            ("AAAUSDT", 9),
            ("BBBUSDT", 3),
            ("CCCUSDT", 12),
            ("DDDUSDT", 1),
            ("EEEUSDT", 7),
        ];
        let list = symbols(&["EEEUSDT", "AAAUSDT", "DDDUSDT", "CCCUSDT", "BBBUSDT"]);
        let sequential = pipeline(MultiSource::new(&entries)).run_batch(
            &list,
            start(),
            BatchOptions::default(),
        );
        let parallel = pipeline(MultiSource::new(&entries)).run_batch(
            &list,
            start(),
            BatchOptions {
                parallel: true,
                show_progress: false,
            },
        );
        assert_eq!(sequential.table, parallel.table);
        assert_eq!(sequential.succeeded, list);
        assert_eq!(parallel.succeeded, list);
    }

    #[test]
    fn snapshot_features_match_online_run() {
        let entries = [("BTCUSDT", 8), ("ETHUSDT", 5)];
        let list = symbols(&["BTCUSDT", "ETHUSDT"]);
        let online = pipeline(MultiSource::new(&entries)).run_batch(
            &list,
            start(),
            BatchOptions::default(),
        );
        let (snapshot, failures) = pipeline(MultiSource::new(&entries)).fetch_batch(
            &list,
            start(),
            BatchOptions::default(),
        );
        assert!(failures.is_empty());
        assert_eq!(snapshot.bar_count(), 13);

        let offline = features_from_snapshot(&snapshot, FeatureWindows::new(3, 2).unwrap());
        assert_eq!(offline, online.table);
    }
}
