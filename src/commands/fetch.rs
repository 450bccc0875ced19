use crate::commands::log_failures;
use crate::context::AppContext;
use crate::pipeline::BatchOptions;
use anyhow::{anyhow, Result};
use std::path::Path;

pub fn run(
    app: &AppContext,
    symbols: &[String],
    options: BatchOptions,
    output_path: &Path,
) -> Result<()> {
    let logger = app.logger();
    let start_date = app.settings().start_date;
    logger.info(format_args!(
        "Fetching daily bars for {} symbol(s) since {}",
        symbols.len(),
        start_date
    ));

    let pipeline = app.http_pipeline()?;
    let (snapshot, failures) = pipeline.fetch_batch(symbols, start_date, options);
    log_failures(logger, &failures);
    if snapshot.series.is_empty() {
        return Err(anyhow!(
            "No bars retrieved for any of the {} requested symbol(s)",
            symbols.len()
        ));
    }

    snapshot.save_to_file(output_path)?;
    logger.info(format_args!(
        "Bar snapshot with {} bars across {} symbol(s) written to {}",
        snapshot.bar_count(),
        snapshot.series.len(),
        output_path.display()
    ));
    Ok(())
}
