use crate::error::{CalendarResult, Error};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Run `op` until it succeeds, fails permanently, or runs out of retries
///
/// Only transient errors are retried. The delay doubles after each failed
/// attempt, starting from `base_delay`.
pub async fn retry_with_backoff<T, F, Fut>(
    retries: u32,
    base_delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> CalendarResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CalendarResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retries => {
                let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt));
                attempt += 1;
                warn!(
                    attempt,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Calendar fetch failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}
