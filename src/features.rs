use crate::models::{Bar, FeatureRow, FeatureTable, FeatureWindows};
use chrono::NaiveDate;
use std::collections::VecDeque;

/// Computes one feature row per bar, in input order.
pub fn compute(symbol: &str, bars: &[Bar], windows: FeatureWindows) -> FeatureTable {
    FeatureTable {
        windows,
        rows: compute_rows(symbol, bars, windows),
    }
}

pub fn compute_rows(symbol: &str, bars: &[Bar], windows: FeatureWindows) -> Vec<FeatureRow> {
    let highs: Vec<f64> = bars.iter().map(|bar| bar.high).collect();
    let lows: Vec<f64> = bars.iter().map(|bar| bar.low).collect();
    let dates: Vec<NaiveDate> = bars.iter().map(|bar| bar.date).collect();

    let high_last = trailing_max(&highs, windows.lookback());
    let low_last = trailing_min(&lows, windows.lookback());
    let high_next = leading_max(&highs, windows.lookahead());
    let low_next = leading_min(&lows, windows.lookahead());
    let days_since_high = days_since_prefix_max(&dates, &highs);
    let days_since_low = days_since_prefix_min(&dates, &lows);

    bars.iter()
        .enumerate()
        .map(|(i, bar)| FeatureRow {
            symbol: symbol.to_string(),
            bar: *bar,
            high_last: high_last[i],
            low_last: low_last[i],
            days_since_high_last: days_since_high[i],
            days_since_low_last: days_since_low[i],
            pct_diff_from_high_last: pct_diff(bar.close, high_last[i]),
            pct_diff_from_low_last: pct_diff(bar.close, low_last[i]),
            high_next: high_next[i],
            low_next: low_next[i],
            pct_diff_from_high_next: pct_diff(bar.close, high_next[i]),
            pct_diff_from_low_next: pct_diff(bar.close, low_next[i]),
        })
        .collect()
}

/// `(close - extreme) / extreme * 100`. A zero extreme gives an infinite or NaN result.
pub fn pct_diff(close: f64, extreme: Option<f64>) -> Option<f64> {
    extreme.map(|extreme| (close - extreme) / extreme * 100.0)
}

/// Max over `values[i+1-window..=i]`, undefined for the first `window - 1` entries.
pub fn trailing_max(values: &[f64], window: usize) -> Vec<Option<f64>> {
    trailing_extreme(values, window, |candidate, kept| candidate >= kept)
}

/// Min over `values[i+1-window..=i]`, undefined for the first `window - 1` entries.
pub fn trailing_min(values: &[f64], window: usize) -> Vec<Option<f64>> {
    trailing_extreme(values, window, |candidate, kept| candidate <= kept)
}

/// Max over the `window` values strictly after `i`, undefined when `i + window >= len`.
pub fn leading_max(values: &[f64], window: usize) -> Vec<Option<f64>> {
    shift_back(trailing_max(values, window), window)
}

/// Min over the `window` values strictly after `i`, undefined when `i + window >= len`.
pub fn leading_min(values: &[f64], window: usize) -> Vec<Option<f64>> {
    shift_back(trailing_min(values, window), window)
}

// Monotonic deque of indices; `dominates(new, old)` evicts `old` from the back.
fn trailing_extreme<F>(values: &[f64], window: usize, dominates: F) -> Vec<Option<f64>>
where
    F: Fn(f64, f64) -> bool,
{
    let mut output = vec![None; values.len()];
    if window == 0 {
        return output;
    }

    let mut deque: VecDeque<usize> = VecDeque::with_capacity(window);
    for (i, &value) in values.iter().enumerate() {
        while let Some(&back) = deque.back() {
            if dominates(value, values[back]) {
                deque.pop_back();
            } else {
                break;
            }
        }
        deque.push_back(i);

        while let Some(&front) = deque.front() {
            if front + window <= i {
                deque.pop_front();
            } else {
                break;
            }
        }

        if i + 1 >= window {
            output[i] = deque.front().map(|&index| values[index]);
        }
    }
    output
}

// The trailing window ending at `i + window` is exactly `i+1..=i+window`.
fn shift_back(trailing: Vec<Option<f64>>, window: usize) -> Vec<Option<f64>> {
    let len = trailing.len();
    (0..len)
        .map(|i| {
            let source = i + window;
            if window > 0 && source < len {
                trailing[source]
            } else {
                None
            }
        })
        .collect()
}

/// Calendar days between each date and the date of the highest value among all *earlier* rows.
///
/// This runs over the whole growing prefix, not a fixed window. Ties resolve to the earliest row.
pub fn days_since_prefix_max(dates: &[NaiveDate], values: &[f64]) -> Vec<Option<i64>> {
    days_since_prefix_extreme(dates, values, |candidate, best| candidate > best)
}

/// Calendar days between each date and the date of the lowest value among all *earlier* rows.
pub fn days_since_prefix_min(dates: &[NaiveDate], values: &[f64]) -> Vec<Option<i64>> {
    days_since_prefix_extreme(dates, values, |candidate, best| candidate < best)
}

fn days_since_prefix_extreme<F>(dates: &[NaiveDate], values: &[f64], better: F) -> Vec<Option<i64>>
where
    F: Fn(f64, f64) -> bool,
{
    let len = dates.len().min(values.len());
    let mut output = Vec::with_capacity(len);
    let mut best: Option<usize> = None;

    for i in 0..len {
        output.push(best.map(|index| (dates[i] - dates[index]).num_days()));
        best = match best {
            Some(index) if !better(values[i], values[index]) => Some(index),
            _ => Some(i),
        };
    }
    output
}
