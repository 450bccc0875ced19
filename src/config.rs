use crate::models::FeatureWindows;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
pub const MAX_PAGE_LIMIT: usize = 1000;
pub const DEFAULT_START_DATE: &str = "2020-01-01";

const SETTING_KEYS: [&str; 9] = [
    "KLINES_BASE_URL",
    "FETCH_PAGE_LIMIT",
    "FETCH_PAGE_DELAY_MS",
    "FETCH_RETRY_ATTEMPTS",
    "FETCH_RETRY_DELAY_MS",
    "HTTP_TIMEOUT_SECS",
    "LOOKBACK_DAYS",
    "LOOKAHEAD_DAYS",
    "START_DATE",
];

/// Pagination and retry knobs for the retriever.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub page_limit: usize,
    pub page_delay: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_limit: MAX_PAGE_LIMIT,
            page_delay: Duration::from_millis(100),
            retry_attempts: 5,
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub base_url: String,
    pub http_timeout: Duration,
    pub fetch: FetchSettings,
    pub windows: FeatureWindows,
    pub start_date: NaiveDate,
}

impl PipelineSettings {
    /// Reads the known keys from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_settings_map(&settings_from_env())
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = FetchSettings::default();

        let base_url = optional_setting(settings, "KLINES_BASE_URL")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(anyhow!(
                "Setting KLINES_BASE_URL must be an http(s) URL (value: {})",
                base_url
            ));
        }

        let page_limit = setting_usize(settings, "FETCH_PAGE_LIMIT", defaults.page_limit, 1)?;
        if page_limit > MAX_PAGE_LIMIT {
            return Err(anyhow!(
                "Setting FETCH_PAGE_LIMIT must be <= {} (value: {})",
                MAX_PAGE_LIMIT,
                page_limit
            ));
        }
        let page_delay_ms = setting_usize(
            settings,
            "FETCH_PAGE_DELAY_MS",
            defaults.page_delay.as_millis() as usize,
            0,
        )?;
        let retry_attempts = setting_usize(
            settings,
            "FETCH_RETRY_ATTEMPTS",
            defaults.retry_attempts as usize,
            1,
        )?;
        let retry_delay_ms = setting_usize(
            settings,
            "FETCH_RETRY_DELAY_MS",
            defaults.retry_delay.as_millis() as usize,
            0,
        )?;
        let http_timeout_secs = setting_usize(settings, "HTTP_TIMEOUT_SECS", 30, 1)?;
        let lookback = setting_usize(
            settings,
            "LOOKBACK_DAYS",
            FeatureWindows::DEFAULT_LOOKBACK,
            1,
        )?;
        let lookahead = setting_usize(
            settings,
            "LOOKAHEAD_DAYS",
            FeatureWindows::DEFAULT_LOOKAHEAD,
            1,
        )?;
        let start_date = match optional_setting(settings, "START_DATE") {
            Some(raw) => parse_date_setting("START_DATE", raw)?,
            None => parse_date_setting("START_DATE", DEFAULT_START_DATE)?,
        };

        Ok(Self {
            base_url,
            http_timeout: Duration::from_secs(http_timeout_secs as u64),
            fetch: FetchSettings {
                page_limit,
                page_delay: Duration::from_millis(page_delay_ms as u64),
                retry_attempts: u32::try_from(retry_attempts).map_err(|_| {
                    anyhow!(
                        "Setting FETCH_RETRY_ATTEMPTS is too large (value: {})",
                        retry_attempts
                    )
                })?,
                retry_delay: Duration::from_millis(retry_delay_ms as u64),
            },
            windows: FeatureWindows::new(lookback, lookahead)?,
            start_date,
        })
    }

    /// Applies CLI overrides on top of the settings map.
    pub fn with_overrides(
        mut self,
        start_date: Option<NaiveDate>,
        lookback: Option<usize>,
        lookahead: Option<usize>,
    ) -> Result<Self> {
        if let Some(start_date) = start_date {
            self.start_date = start_date;
        }
        if lookback.is_some() || lookahead.is_some() {
            self.windows = FeatureWindows::new(
                lookback.unwrap_or(self.windows.lookback()),
                lookahead.unwrap_or(self.windows.lookahead()),
            )?;
        }
        Ok(self)
    }
}

/// Collects the recognized keys from the environment into a settings map.
pub fn settings_from_env() -> HashMap<String, String> {
    SETTING_KEYS
        .iter()
        .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn parse_date_setting(key: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

/// Normalizes a symbol string by trimming whitespace and uppercasing.
pub fn normalize_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalizes and de-duplicates symbols while keeping first-seen order.
pub fn normalize_symbols<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .filter_map(|value| normalize_symbol(value.as_ref()))
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

pub const DEFAULT_SYMBOLS: [&str; 72] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "LTCUSDT", "XRPUSDT", "DOGEUSDT", "SOLUSDT", "ADAUSDT",
    "DOTUSDT", "LINKUSDT", "AVAXUSDT", "SHIBUSDT", "MATICUSDT", "TRXUSDT", "ALGOUSDT", "XLMUSDT",
    "VETUSDT", "FILUSDT", "ICPUSDT", "AAVEUSDT", "ETCUSDT", "LUNAUSDT", "SANDUSDT", "CHZUSDT",
    "MANAUSDT", "BATUSDT", "FETUSDT", "ZRXUSDT", "RAVENUSDT", "COMPUSDT", "DASHUSDT", "NEOUSDT",
    "QTUMUSDT", "ZILUSDT", "NANOUSDT", "WAVESUSDT", "XEMUSDT", "LTCBTC", "XRPBTC", "DOGEBTC",
    "BTCEUR", "BTCJPY", "BTCAUD", "BTCGBP", "BTCCHF", "BTCUSDC", "ETHBTC", "BNBBTC", "LTCBTC",
    "XRPETH", "ADABTC", "DOTBTC", "LINKBTC", "MATICBTC", "TRXBTC", "SOLBTC", "AVAXBTC", "SHIBBTC",
    "SANDBTC", "CHZBTC", "MANABTC", "AAVEBTC", "ETCBTC", "LUNABTC", "DASHBTC", "QTUMBTC", "FILBTC",
    "XLMBTC", "VETBTC", "NEOBTC", "ALGBTC", "XEMBTC",
];

/// Uses the given symbols, or the default universe when none were supplied.
pub fn resolve_symbols(cli_symbols: &[String]) -> Vec<String> {
    if cli_symbols.is_empty() {
        normalize_symbols(&DEFAULT_SYMBOLS)
    } else {
        normalize_symbols(cli_symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_map_yields_defaults() {
        let parsed = PipelineSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed.base_url, DEFAULT_BASE_URL);
        assert_eq!(parsed.fetch.page_limit, 1000);
        assert_eq!(parsed.fetch.retry_attempts, 5);
        assert_eq!(parsed.fetch.page_delay, Duration::from_millis(100));
        assert_eq!(parsed.fetch.retry_delay, Duration::from_secs(2));
        assert_eq!(parsed.windows, FeatureWindows::default());
        assert_eq!(
            parsed.start_date,
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = PipelineSettings::from_settings_map(&settings(&[("FETCH_PAGE_LIMIT", "5000")]))
            .unwrap_err();
        assert!(err.to_string().contains("FETCH_PAGE_LIMIT"));

        let err =
            PipelineSettings::from_settings_map(&settings(&[("FETCH_RETRY_ATTEMPTS", "0")]))
                .unwrap_err();
        assert!(err.to_string().contains(">= 1"));

        let err = PipelineSettings::from_settings_map(&settings(&[("LOOKBACK_DAYS", "2.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("integer"));

        let err = PipelineSettings::from_settings_map(&settings(&[("START_DATE", "01/02/2020")]))
            .unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn overrides_replace_windows_and_start() {
        let parsed = PipelineSettings::from_settings_map(&settings(&[
            ("LOOKBACK_DAYS", "10"),
            ("KLINES_BASE_URL", "http://127.0.0.1:9000/"),
        ]))
        .unwrap();
        assert_eq!(parsed.base_url, "http://127.0.0.1:9000");

        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let updated = parsed.with_overrides(Some(start), None, Some(3)).unwrap();
        assert_eq!(updated.start_date, start);
        assert_eq!(updated.windows.lookback(), 10);
        assert_eq!(updated.windows.lookahead(), 3);
    }

    #[test]
    fn default_universe_is_deduplicated() {
        let symbols = resolve_symbols(&[]);
        assert_eq!(symbols.len(), DEFAULT_SYMBOLS.len() - 1);
        assert_eq!(symbols[0], "BTCUSDT");

        let custom = resolve_symbols(&[" btcusdt".to_string(), "BTCUSDT".to_string()]);
        assert_eq!(custom, vec!["BTCUSDT".to_string()]);
    }
}
