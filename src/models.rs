use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily open/high/low/close observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
        }
    }
}

/// Returns true when dates strictly increase across the sequence.
pub fn is_strictly_increasing(bars: &[Bar]) -> bool {
    bars.windows(2).all(|pair| pair[0].date < pair[1].date)
}

/// Lookback (L) and lookahead (F) sizes used by the feature engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureWindows {
    lookback: usize,
    lookahead: usize,
}

impl FeatureWindows {
    pub const DEFAULT_LOOKBACK: usize = 7;
    pub const DEFAULT_LOOKAHEAD: usize = 5;

    pub fn new(lookback: usize, lookahead: usize) -> anyhow::Result<Self> {
        if lookback == 0 {
            return Err(anyhow::anyhow!("lookback window must be >= 1"));
        }
        if lookahead == 0 {
            return Err(anyhow::anyhow!("lookahead window must be >= 1"));
        }
        Ok(Self {
            lookback,
            lookahead,
        })
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn lookahead(&self) -> usize {
        self.lookahead
    }
}

impl Default for FeatureWindows {
    fn default() -> Self {
        Self {
            lookback: Self::DEFAULT_LOOKBACK,
            lookahead: Self::DEFAULT_LOOKAHEAD,
        }
    }
}

/// A bar plus its derived lookback/lookahead columns.
///
/// `None` marks a value that is undefined at the series boundary. Percentage fields carry the
/// raw ratio, so a zero extreme shows up as an infinite or NaN value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub symbol: String,
    pub bar: Bar,
    pub high_last: Option<f64>,
    pub low_last: Option<f64>,
    pub days_since_high_last: Option<i64>,
    pub days_since_low_last: Option<i64>,
    pub pct_diff_from_high_last: Option<f64>,
    pub pct_diff_from_low_last: Option<f64>,
    pub high_next: Option<f64>,
    pub low_next: Option<f64>,
    pub pct_diff_from_high_next: Option<f64>,
    pub pct_diff_from_low_next: Option<f64>,
}

/// Feature rows for one or more symbols, computed with the same windows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub windows: FeatureWindows,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(windows: FeatureWindows) -> Self {
        Self {
            windows,
            rows: Vec::new(),
        }
    }

    pub fn extend(&mut self, rows: Vec<FeatureRow>) {
        self.rows.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows_for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a FeatureRow> {
        self.rows.iter().filter(move |row| row.symbol == symbol)
    }
}
