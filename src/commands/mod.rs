pub mod features;
pub mod fetch;
pub mod predict;

use crate::logging::Logger;
use crate::pipeline::SymbolFailure;

pub(crate) fn log_failures(logger: &Logger, failures: &[SymbolFailure]) {
    if failures.is_empty() {
        return;
    }
    let skipped: Vec<&str> = failures.iter().map(|f| f.symbol.as_str()).collect();
    logger.warn(format_args!(
        "Skipped {} symbol(s): {}",
        failures.len(),
        skipped.join(", ")
    ));
}
