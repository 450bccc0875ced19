use crate::error::FetchError;
use crate::logging::Logger;
use std::thread;
use std::time::Duration;

/// Fixed-budget, fixed-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or the attempt budget
/// runs out. Exhausting the budget turns the last transient error into `DataUnavailable`.
///
/// The closure receives the 1-based attempt number.
pub fn retry_fetch_operation<T, F>(
    policy: RetryPolicy,
    context: &str,
    logger: &Logger,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Result<T, FetchError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt) {
            Ok(value) => break Ok(value),
            Err(err) if !err.is_transient() => break Err(err),
            Err(err) if attempt >= max_attempts => {
                logger.error(format_args!(
                    "Attempt {}/{} for {} failed: {}. Giving up.",
                    attempt, max_attempts, context, err
                ));
                break Err(FetchError::DataUnavailable {
                    symbol: err.symbol().to_string(),
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                logger.warn(format_args!(
                    "Attempt {}/{} for {} failed: {}. Retrying in {}ms.",
                    attempt,
                    max_attempts,
                    context,
                    err,
                    policy.delay.as_millis()
                ));
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
                attempt += 1;
            }
        }
    }
}
