use crate::commands::log_failures;
use crate::context::AppContext;
use crate::export::{self, SentinelPolicy};
use crate::models::FeatureTable;
use crate::pipeline::{self, BatchOptions};
use crate::snapshot::BarSnapshot;
use anyhow::{anyhow, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};

/// How undefined feature values are written to the CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NullSentinel {
    /// Write `0` (what existing consumers of the export expect)
    Zero,
    /// Leave the cell empty
    Empty,
}

impl From<NullSentinel> for SentinelPolicy {
    fn from(value: NullSentinel) -> Self {
        match value {
            NullSentinel::Zero => SentinelPolicy::Zero,
            NullSentinel::Empty => SentinelPolicy::Empty,
        }
    }
}

pub struct FeaturesArgs<'a> {
    pub symbols: &'a [String],
    /// Compute from a bar snapshot instead of the network.
    pub data_file: Option<PathBuf>,
    pub output: &'a Path,
    pub sentinel: NullSentinel,
    pub options: BatchOptions,
}

pub fn run(app: &AppContext, args: FeaturesArgs<'_>) -> Result<()> {
    let logger = app.logger();
    let windows = app.settings().windows;
    logger.info(format_args!(
        "Computing features (lookback {} days, lookahead {} days) for {} symbol(s)",
        windows.lookback(),
        windows.lookahead(),
        args.symbols.len()
    ));

    let table = match args.data_file.as_deref() {
        Some(path) => offline_table(app, path, args.symbols)?,
        None => {
            let pipeline = app.http_pipeline()?;
            let report = pipeline.run_batch(args.symbols, app.settings().start_date, args.options);
            log_failures(logger, &report.failures);
            report.table
        }
    };

    if table.is_empty() {
        return Err(anyhow!("No feature rows were produced"));
    }

    export::write_table_to_path(args.output, &table, args.sentinel.into())?;
    logger.info(format_args!(
        "Wrote {} feature rows to {}",
        table.len(),
        args.output.display()
    ));
    Ok(())
}

/// Loads the snapshot and keeps the requested symbols, in request order, from the start date on.
fn offline_table(app: &AppContext, path: &Path, symbols: &[String]) -> Result<FeatureTable> {
    let logger = app.logger();
    let start_date = app.settings().start_date;
    logger.info(format_args!("Using bar snapshot from {}", path.display()));
    let mut snapshot = BarSnapshot::load_from_file(path)?;

    if start_date < snapshot.start_date {
        logger.warn(format_args!(
            "Snapshot starts at {}, later than the requested {}",
            snapshot.start_date, start_date
        ));
    }
    for entry in snapshot.series.iter_mut() {
        entry.bars.retain(|bar| bar.date >= start_date);
    }

    let mut selected = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        match snapshot.series.iter().position(|entry| &entry.symbol == symbol) {
            Some(index) => selected.push(snapshot.series.swap_remove(index)),
            None => logger.warn(format_args!("{} is not in the snapshot, skipping", symbol)),
        }
    }
    snapshot.series = selected;

    Ok(pipeline::features_from_snapshot(
        &snapshot,
        app.settings().windows,
    ))
}
