use crate::error::FetchError;
use crate::logging::Logger;
use crate::models::Bar;
use crate::retriever::{KlineSource, PageRequest};
use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const KLINES_PATH: &str = "/api/v3/klines";
pub const DAILY_INTERVAL: &str = "1d";

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// One candle record as returned upstream: a fixed-position array
/// `[open_time, open, high, low, close, volume, close_time, ...]`.
///
/// Only the first five positions are read. Trailing fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RawCandle(pub Vec<Value>);

impl RawCandle {
    /// Builds a record in the upstream layout (prices as strings, daily close time).
    pub fn from_ohlc(open_time_ms: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self(vec![
            Value::from(open_time_ms),
            Value::from(open.to_string()),
            Value::from(high.to_string()),
            Value::from(low.to_string()),
            Value::from(close.to_string()),
            Value::from("0"),
            Value::from(open_time_ms + 86_400_000 - 1),
        ])
    }

    pub fn open_time_ms(&self) -> Result<i64, String> {
        let raw = self
            .0
            .first()
            .ok_or_else(|| "empty candle record".to_string())?;
        match raw {
            Value::Number(number) => number
                .as_i64()
                .ok_or_else(|| format!("open time {} is not an integer", number)),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("open time {:?} is not an integer", text)),
            other => Err(format!("open time {} is not an integer", other)),
        }
    }

    pub fn to_bar(&self) -> Result<Bar, String> {
        if self.0.len() < 5 {
            return Err(format!(
                "candle record has {} fields, expected at least 5",
                self.0.len()
            ));
        }
        let open_time = self.open_time_ms()?;
        let date = DateTime::from_timestamp_millis(open_time)
            .ok_or_else(|| format!("open time {} is out of range", open_time))?
            .date_naive();

        Ok(Bar {
            date,
            open: self.price_at(1, "open")?,
            high: self.price_at(2, "high")?,
            low: self.price_at(3, "low")?,
            close: self.price_at(4, "close")?,
        })
    }

    fn price_at(&self, index: usize, field: &str) -> Result<f64, String> {
        let raw = &self.0[index];
        let value = match raw {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        match value {
            Some(value) if value.is_finite() => Ok(value),
            _ => Err(format!("{} value {} is not a finite number", field, raw)),
        }
    }
}

/// Blocking HTTP client for the klines endpoint.
pub struct HttpKlineSource {
    http: reqwest::blocking::Client,
    base_url: String,
    logger: Logger,
}

impl HttpKlineSource {
    pub fn new(base_url: &str, timeout: Duration, logger: Logger) -> Result<Self> {
        Ok(Self {
            http: build_blocking_client(Some(timeout))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            logger,
        })
    }
}

impl KlineSource for HttpKlineSource {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Vec<RawCandle>, FetchError> {
        let url = format!("{}{}", self.base_url, KLINES_PATH);
        self.logger.debug(format_args!(
            "GET {} symbol={} startTime={} endTime={} limit={}",
            url, request.symbol, request.start_ms, request.end_ms, request.limit
        ));

        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", request.symbol.to_string()),
                ("interval", DAILY_INTERVAL.to_string()),
                ("startTime", request.start_ms.to_string()),
                ("endTime", request.end_ms.to_string()),
                ("limit", request.limit.to_string()),
            ])
            .send()
            .map_err(|err| {
                FetchError::transient(request.symbol, format!("GET {} failed: {}", url, err))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
            return Err(FetchError::transient(
                request.symbol,
                format!("GET {} returned {}: {}", url, status, preview),
            ));
        }

        let body = response.text().map_err(|err| {
            FetchError::transient(
                request.symbol,
                format!("failed to read response body: {}", err),
            )
        })?;

        serde_json::from_str::<Vec<RawCandle>>(&body).map_err(|err| {
            FetchError::malformed(
                request.symbol,
                format!("failed to parse klines payload: {}", err),
            )
        })
    }
}

pub fn build_blocking_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parses_upstream_layout_with_trailing_fields() {
        let payload = r#"[[1577836800000,"7195.24","7255.00","7175.15","7200.85","16792.39",1577923199999,"121214452.11",194010,"8946.95","64597785.21","0"]]"#;
        let rows: Vec<RawCandle> = serde_json::from_str(payload).unwrap();
        let bar = rows[0].to_bar().unwrap();
        assert_eq!(bar.date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(bar.open, 7195.24);
        assert_eq!(bar.high, 7255.0);
        assert_eq!(bar.low, 7175.15);
        assert_eq!(bar.close, 7200.85);
        assert_eq!(rows[0].open_time_ms().unwrap(), 1_577_836_800_000);
    }

    #[test]
    fn accepts_numeric_prices() {
        let row = RawCandle(vec![
            Value::from(1_577_923_200_000i64),
            Value::from(1.5),
            Value::from(2),
            Value::from(1.0),
            Value::from(1.75),
        ]);
        let bar = row.to_bar().unwrap();
        assert_eq!(bar.date, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(bar.high, 2.0);
    }

    #[test]
    fn rejects_unparsable_or_short_rows() {
        let bad_price = RawCandle(vec![
            Value::from(1_577_836_800_000i64),
            Value::from("1.0"),
            Value::from("n/a"),
            Value::from("1.0"),
            Value::from("1.0"),
        ]);
        assert!(bad_price.to_bar().unwrap_err().contains("high"));

        let infinite = RawCandle(vec![
            Value::from(1_577_836_800_000i64),
            Value::from("1.0"),
            Value::from("inf"),
            Value::from("1.0"),
            Value::from("1.0"),
        ]);
        assert!(infinite.to_bar().is_err());

        let short = RawCandle(vec![Value::from(1_577_836_800_000i64), Value::from("1.0")]);
        assert!(short.to_bar().unwrap_err().contains("at least 5"));

        let fractional_time = RawCandle(vec![
            Value::from(1.5),
            Value::from("1.0"),
            Value::from("1.0"),
            Value::from("1.0"),
            Value::from("1.0"),
        ]);
        assert!(fractional_time.open_time_ms().is_err());
    }

    #[test]
    fn from_ohlc_round_trips_through_to_bar() {
        let row = RawCandle::from_ohlc(1_577_836_800_000, 10.0, 12.0, 9.0, 11.0);
        let bar = row.to_bar().unwrap();
        assert_eq!(
            bar,
            Bar::new(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 10.0, 12.0, 9.0, 11.0)
        );
    }
}
