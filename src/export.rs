//! CSV export of feature tables for the downstream training/persistence step.
//!
//! Column names follow the established `High_Last_{L}_Days` / `%_Diff_From_High_Next_{F}_Days`
//! layout so existing consumers keep working.

use crate::error::ExportError;
use crate::models::{Bar, FeatureRow, FeatureTable, FeatureWindows};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";
const SYMBOL_COLUMN: &str = "Crypto Pair";
const COLUMN_COUNT: usize = 16;

/// How undefined (`None`), NaN and infinite values are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SentinelPolicy {
    /// Write `0`, matching what existing downstream consumers expect. Lossy.
    #[default]
    Zero,
    /// Leave the cell empty so a reader can tell "undefined" from a real zero.
    Empty,
}

impl SentinelPolicy {
    fn sentinel(self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::Empty => "",
        }
    }

    fn float(self, value: Option<f64>) -> String {
        match value {
            Some(value) if value.is_finite() => value.to_string(),
            _ => self.sentinel().to_string(),
        }
    }

    fn days(self, value: Option<i64>) -> String {
        match value {
            Some(value) => value.to_string(),
            None => self.sentinel().to_string(),
        }
    }
}

pub fn column_names(windows: FeatureWindows) -> Vec<String> {
    let l = windows.lookback();
    let f = windows.lookahead();
    vec![
        "Date".to_string(),
        "Open".to_string(),
        "High".to_string(),
        "Low".to_string(),
        "Close".to_string(),
        format!("High_Last_{l}_Days"),
        format!("Low_Last_{l}_Days"),
        format!("Days_Since_High_Last_{l}_Days"),
        format!("Days_Since_Low_Last_{l}_Days"),
        format!("%_Diff_From_High_Last_{l}_Days"),
        format!("%_Diff_From_Low_Last_{l}_Days"),
        format!("High_Next_{f}_Days"),
        format!("Low_Next_{f}_Days"),
        format!("%_Diff_From_High_Next_{f}_Days"),
        format!("%_Diff_From_Low_Next_{f}_Days"),
        SYMBOL_COLUMN.to_string(),
    ]
}

fn row_record(row: &FeatureRow, policy: SentinelPolicy) -> Vec<String> {
    let bar = &row.bar;
    vec![
        bar.date.format(DATE_FORMAT).to_string(),
        policy.float(Some(bar.open)),
        policy.float(Some(bar.high)),
        policy.float(Some(bar.low)),
        policy.float(Some(bar.close)),
        policy.float(row.high_last),
        policy.float(row.low_last),
        policy.days(row.days_since_high_last),
        policy.days(row.days_since_low_last),
        policy.float(row.pct_diff_from_high_last),
        policy.float(row.pct_diff_from_low_last),
        policy.float(row.high_next),
        policy.float(row.low_next),
        policy.float(row.pct_diff_from_high_next),
        policy.float(row.pct_diff_from_low_next),
        row.symbol.clone(),
    ]
}

pub fn write_table<W: Write>(
    writer: W,
    table: &FeatureTable,
    policy: SentinelPolicy,
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(column_names(table.windows))?;
    for row in &table.rows {
        csv_writer.write_record(row_record(row, policy))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_table_to_path<P: AsRef<Path>>(
    path: P,
    table: &FeatureTable,
    policy: SentinelPolicy,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create export directory {}", parent.display())
            })?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Unable to create feature export at {}", path.display()))?;
    write_table(BufWriter::new(file), table, policy)
        .with_context(|| format!("Failed to write feature export to {}", path.display()))?;
    Ok(())
}

/// Parses an exported table back, recovering the window sizes from the header.
pub fn read_table<R: Read>(reader: R) -> Result<FeatureTable, ExportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|header| header.to_string())
        .collect();
    let windows = windows_from_headers(&headers)?;

    let mut rows = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != COLUMN_COUNT {
            return Err(ExportError::Header(format!(
                "row {} has {} fields, expected {}",
                index + 1,
                record.len(),
                COLUMN_COUNT
            )));
        }
        let cells = RowCells {
            row: index + 1,
            headers: &headers,
            record: &record,
        };
        let date_raw = cells.raw(0);
        let date = NaiveDate::parse_from_str(date_raw.trim(), DATE_FORMAT)
            .map_err(|_| cells.invalid(0))?;

        rows.push(FeatureRow {
            symbol: cells.raw(15).to_string(),
            bar: Bar {
                date,
                open: cells.required_float(1)?,
                high: cells.required_float(2)?,
                low: cells.required_float(3)?,
                close: cells.required_float(4)?,
            },
            high_last: cells.float(5)?,
            low_last: cells.float(6)?,
            days_since_high_last: cells.days(7)?,
            days_since_low_last: cells.days(8)?,
            pct_diff_from_high_last: cells.float(9)?,
            pct_diff_from_low_last: cells.float(10)?,
            high_next: cells.float(11)?,
            low_next: cells.float(12)?,
            pct_diff_from_high_next: cells.float(13)?,
            pct_diff_from_low_next: cells.float(14)?,
        });
    }

    Ok(FeatureTable { windows, rows })
}

pub fn read_table_from_path<P: AsRef<Path>>(path: P) -> Result<FeatureTable> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open feature export at {}", path.display()))?;
    let table = read_table(BufReader::new(file))
        .with_context(|| format!("Failed to parse feature export at {}", path.display()))?;
    Ok(table)
}

fn windows_from_headers(headers: &[String]) -> Result<FeatureWindows, ExportError> {
    if headers.len() != COLUMN_COUNT {
        return Err(ExportError::Header(format!(
            "found {} columns, expected {}",
            headers.len(),
            COLUMN_COUNT
        )));
    }
    let lookback = window_from_header(&headers[5], "High_Last_")?;
    let lookahead = window_from_header(&headers[11], "High_Next_")?;
    let windows = FeatureWindows::new(lookback, lookahead)
        .map_err(|err| ExportError::Header(err.to_string()))?;

    let expected = column_names(windows);
    if let Some((found, wanted)) = headers
        .iter()
        .zip(expected.iter())
        .find(|(found, wanted)| found != wanted)
    {
        return Err(ExportError::Header(format!(
            "found column {:?}, expected {:?}",
            found, wanted
        )));
    }
    Ok(windows)
}

fn window_from_header(header: &str, prefix: &str) -> Result<usize, ExportError> {
    header
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix("_Days"))
        .and_then(|size| size.parse::<usize>().ok())
        .ok_or_else(|| ExportError::Header(format!("cannot read window size from {:?}", header)))
}

struct RowCells<'a> {
    row: usize,
    headers: &'a [String],
    record: &'a csv::StringRecord,
}

impl<'a> RowCells<'a> {
    fn raw(&self, index: usize) -> &'a str {
        self.record.get(index).unwrap_or("")
    }

    fn invalid(&self, index: usize) -> ExportError {
        ExportError::Cell {
            row: self.row,
            column: self.headers[index].clone(),
            value: self.raw(index).to_string(),
        }
    }

    fn float(&self, index: usize) -> Result<Option<f64>, ExportError> {
        let raw = self.raw(index).trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<f64>()
            .map(Some)
            .map_err(|_| self.invalid(index))
    }

    fn required_float(&self, index: usize) -> Result<f64, ExportError> {
        self.float(index)?.ok_or_else(|| self.invalid(index))
    }

    fn days(&self, index: usize) -> Result<Option<i64>, ExportError> {
        let raw = self.raw(index).trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if let Ok(value) = raw.parse::<i64>() {
            return Ok(Some(value));
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && value.fract() == 0.0 => Ok(Some(value as i64)),
            _ => Err(self.invalid(index)),
        }
    }
}
