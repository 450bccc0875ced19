use crate::binance::RawCandle;
use crate::config::FetchSettings;
use crate::error::FetchError;
use crate::logging::Logger;
use crate::models::Bar;
use crate::retry::{retry_fetch_operation, RetryPolicy};
use chrono::{NaiveDate, Utc};
use std::thread;

/// Parameters of one page request against the klines endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub symbol: &'a str,
    pub start_ms: i64,
    pub end_ms: i64,
    pub limit: usize,
}

/// A paginated source of raw daily candles.
pub trait KlineSource {
    /// Returns up to `request.limit` candles with open time in `[start_ms, end_ms]`, oldest first.
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError>;
}

impl<T: KlineSource + ?Sized> KlineSource for &T {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError> {
        (**self).fetch_page(request)
    }
}

impl<T: KlineSource + ?Sized> KlineSource for Box<T> {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError> {
        (**self).fetch_page(request)
    }
}

/// Bars from one successful retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub bars: Vec<Bar>,
    /// Attempt that succeeded, 1-based.
    pub attempts: u32,
    /// Non-empty pages read by that attempt.
    pub pages: usize,
}

/// Assembles a symbol's full daily history from a paginated source.
pub struct Retriever<S> {
    source: S,
    settings: FetchSettings,
    logger: Logger,
}

impl<S: KlineSource> Retriever<S> {
    pub fn new(source: S, settings: FetchSettings, logger: Logger) -> Self {
        Self {
            source,
            settings,
            logger,
        }
    }

    /// Fetches every daily bar from `start_date` (midnight UTC) up to now.
    pub fn fetch(&self, symbol: &str, start_date: NaiveDate) -> Result<Vec<Bar>, FetchError> {
        Ok(self.fetch_history(symbol, start_date)?.bars)
    }

    /// Like [`Retriever::fetch`], also reporting the attempts and pages it took.
    pub fn fetch_history(&self, symbol: &str, start_date: NaiveDate) -> Result<History, FetchError> {
        let start_ms = date_to_millis(start_date);
        let end_ms = Utc::now().timestamp_millis();
        self.fetch_history_between(symbol, start_ms, end_ms)
    }

    /// Fetches every daily bar with open time in `[start_ms, end_ms)`.
    pub fn fetch_between(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Bar>, FetchError> {
        Ok(self.fetch_history_between(symbol, start_ms, end_ms)?.bars)
    }

    /// A transient failure restarts pagination from `start_ms`; rows gathered by a failed
    /// attempt are dropped. An empty history is a successful, empty result.
    pub fn fetch_history_between(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<History, FetchError> {
        let policy = RetryPolicy {
            max_attempts: self.settings.retry_attempts,
            delay: self.settings.retry_delay,
        };

        let mut attempts = 0;
        let (bars, pages) = retry_fetch_operation(policy, symbol, &self.logger, |attempt| {
            attempts = attempt;
            if attempt > 1 {
                self.logger.info(format_args!(
                    "Restarting pagination for {} (attempt {})",
                    symbol, attempt
                ));
            }
            self.collect_pages(symbol, start_ms, end_ms)
        })?;

        self.logger.info(format_args!(
            "Fetched {} daily bars for {} in {} page(s)",
            bars.len(),
            symbol,
            pages
        ));
        Ok(History {
            bars,
            attempts,
            pages,
        })
    }

    fn collect_pages(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<(Vec<Bar>, usize), FetchError> {
        let mut bars: Vec<Bar> = Vec::new();
        let mut cursor = start_ms;
        let mut last_open_time = start_ms.saturating_sub(1);
        let mut pages = 0usize;

        while cursor < end_ms {
            let request = PageRequest {
                symbol,
                start_ms: cursor,
                end_ms,
                limit: self.settings.page_limit,
            };
            let page = self.source.fetch_page(&request)?;
            if page.is_empty() {
                self.logger.debug(format_args!(
                    "No more data for {} after cursor {}",
                    symbol, cursor
                ));
                break;
            }
            pages += 1;

            for row in &page {
                let open_time = row
                    .open_time_ms()
                    .map_err(|message| FetchError::malformed(symbol, message))?;
                // Open times must move strictly forward, which also keeps the cursor advancing.
                if open_time <= last_open_time {
                    return Err(FetchError::malformed(
                        symbol,
                        format!(
                            "open time {} does not advance past {}",
                            open_time, last_open_time
                        ),
                    ));
                }
                let bar = row
                    .to_bar()
                    .map_err(|message| FetchError::malformed(symbol, message))?;
                if let Some(previous) = bars.last() {
                    if bar.date <= previous.date {
                        return Err(FetchError::malformed(
                            symbol,
                            format!("duplicate daily bar for {}", bar.date),
                        ));
                    }
                }
                last_open_time = open_time;
                bars.push(bar);
            }

            cursor = last_open_time + 1;

            if cursor < end_ms && !self.settings.page_delay.is_zero() {
                thread::sleep(self.settings.page_delay);
            }
        }

        Ok((bars, pages))
    }
}

pub fn date_to_millis(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const DAY_MS: i64 = 86_400_000;

    struct StubSource {
        rows: Vec<RawCandle>,
        fail_first: u32,
        fail_after_pages: usize,
        calls: AtomicU32,
        requests: Mutex<Vec<(i64, i64, usize)>>,
    }

    impl StubSource {
        fn with_days(start_ms: i64, days: usize) -> Self {
            let rows = (0..days)
                .map(|i| {
                    let base = 100.0 + i as f64;
                    RawCandle::from_ohlc(
                        start_ms + i as i64 * DAY_MS,
                        base,
                        base + 2.0,
                        base - 1.0,
                        base + 1.0,
                    )
                })
                .collect();
            Self {
                rows,
                fail_first: 0,
                fail_after_pages: 0,
                calls: AtomicU32::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, attempts: u32, after_pages: usize) -> Self {
            self.fail_first = attempts;
            self.fail_after_pages = after_pages;
            self
        }
    }

    impl KlineSource for StubSource {
        fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut requests = self.requests.lock().unwrap();
            requests.push((request.start_ms, request.end_ms, request.limit));

            let failures_so_far = requests
                .iter()
                .filter(|(start, _, _)| *start == START_MS)
                .count() as u32;
            let pages_this_attempt = requests
                .iter()
                .rev()
                .take_while(|(start, _, _)| *start != START_MS)
                .count();
            if failures_so_far <= self.fail_first && pages_this_attempt >= self.fail_after_pages {
                return Err(FetchError::transient(request.symbol, "HTTP 502 Bad Gateway"));
            }

            Ok(self
                .rows
                .iter()
                .filter(|row| {
                    let open = row.open_time_ms().unwrap();
                    open >= request.start_ms && open <= request.end_ms
                })
                .take(request.limit)
                .cloned()
                .collect())
        }
    }

    const START_MS: i64 = 1_577_836_800_000; // 2020-01-01

    fn settings(page_limit: usize, retry_attempts: u32) -> FetchSettings {
        FetchSettings {
            page_limit,
            page_delay: Duration::ZERO,
            retry_attempts,
            retry_delay: Duration::ZERO,
        }
    }

    #[test]
    fn every_page_size_yields_the_full_sequence() {
        let days = 23;
        let end_ms = START_MS + 400 * DAY_MS;
        for page_limit in 1..=days + 2 {
            let source = StubSource::with_days(START_MS, days);
            let retriever = Retriever::new(&source, settings(page_limit, 5), Logger::discard());
            let bars = retriever.fetch_between("BTCUSDT", START_MS, end_ms).unwrap();
            assert_eq!(bars.len(), days, "page limit {page_limit}");
            assert!(crate::models::is_strictly_increasing(&bars));
            assert_eq!(
                bars[0].date,
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
            );
        }
    }

    #[test]
    fn history_reports_the_attempt_that_succeeded() {
        let source = StubSource::with_days(START_MS, 5).failing(2, 0);
        let retriever = Retriever::new(&source, settings(2, 5), Logger::discard());
        let history = retriever
            .fetch_history_between("BTCUSDT", START_MS, START_MS + 10 * DAY_MS)
            .unwrap();
        assert_eq!(history.bars.len(), 5);
        assert_eq!(history.attempts, 3);
        assert_eq!(history.pages, 3);
    }

    #[test]
    fn cursor_advances_one_millisecond_past_last_row() {
        let source = StubSource::with_days(START_MS, 5);
        let retriever = Retriever::new(&source, settings(2, 5), Logger::discard());
        retriever
            .fetch_between("BTCUSDT", START_MS, START_MS + 30 * DAY_MS)
            .unwrap();

        let starts: Vec<i64> = source
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(start, _, _)| *start)
            .collect();
        assert_eq!(
            starts,
            vec![
                START_MS,
                START_MS + DAY_MS + 1,
                START_MS + 3 * DAY_MS + 1,
                START_MS + 4 * DAY_MS + 1,
            ]
        );
    }

    #[test]
    fn transient_failures_restart_and_match_clean_run() {
        let end_ms = START_MS + 100 * DAY_MS;
        let clean_source = StubSource::with_days(START_MS, 12);
        let clean = Retriever::new(&clean_source, settings(5, 5), Logger::discard())
            .fetch_between("ETHUSDT", START_MS, end_ms)
            .unwrap();

        // Fail mid-pagination so that earlier pages of the failed attempts get thrown away.
        let flaky_source = StubSource::with_days(START_MS, 12).failing(3, 1);
        let retried = Retriever::new(&flaky_source, settings(5, 5), Logger::discard())
            .fetch_between("ETHUSDT", START_MS, end_ms)
            .unwrap();

        assert_eq!(retried, clean);
        assert_eq!(retried.len(), 12);
    }

    #[test]
    fn exhausted_budget_reports_data_unavailable() {
        let source = StubSource::with_days(START_MS, 12).failing(u32::MAX, 0);
        let result = Retriever::new(&source, settings(5, 3), Logger::discard()).fetch_between(
            "XRPUSDT",
            START_MS,
            START_MS + 100 * DAY_MS,
        );
        match result {
            Err(FetchError::DataUnavailable {
                symbol, attempts, ..
            }) => {
                assert_eq!(symbol, "XRPUSDT");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected DataUnavailable, got {other:?}"),
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_history_is_not_an_error() {
        let source = StubSource::with_days(START_MS, 0);
        let bars = Retriever::new(&source, settings(1000, 5), Logger::discard())
            .fetch_between("NEWUSDT", START_MS, START_MS + DAY_MS)
            .unwrap();
        assert!(bars.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_window_issues_no_requests() {
        let source = StubSource::with_days(START_MS, 3);
        let bars = Retriever::new(&source, settings(1000, 5), Logger::discard())
            .fetch_between("BTCUSDT", START_MS, START_MS)
            .unwrap();
        assert!(bars.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    struct RepeatingSource {
        calls: AtomicU32,
    }

    impl KlineSource for RepeatingSource {
        fn fetch_page(&self, _request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RawCandle::from_ohlc(START_MS, 1.0, 1.0, 1.0, 1.0)])
        }
    }

    #[test]
    fn repeated_page_is_rejected_instead_of_looping() {
        let source = RepeatingSource {
            calls: AtomicU32::new(0),
        };
        let result = Retriever::new(&source, settings(1000, 5), Logger::discard())
            .fetch_between("BTCUSDT", START_MS, START_MS + 10 * DAY_MS);
        assert!(matches!(result, Err(FetchError::MalformedResponse { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    struct MalformedSource {
        calls: AtomicU32,
    }

    impl KlineSource for MalformedSource {
        fn fetch_page(&self, _request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut row = RawCandle::from_ohlc(START_MS, 1.0, 1.0, 1.0, 1.0);
            row.0[4] = serde_json::Value::from("not-a-number");
            Ok(vec![row])
        }
    }

    #[test]
    fn malformed_rows_fail_without_retry() {
        let source = MalformedSource {
            calls: AtomicU32::new(0),
        };
        let result = Retriever::new(&source, settings(1000, 5), Logger::discard())
            .fetch_between("BTCUSDT", START_MS, START_MS + 10 * DAY_MS);
        match result {
            Err(FetchError::MalformedResponse { symbol, message }) => {
                assert_eq!(symbol, "BTCUSDT");
                assert!(message.contains("close"));
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_date_maps_to_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(date_to_millis(date), START_MS);
    }
}
