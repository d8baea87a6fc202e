use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::warn;

use crate::config::RetrySettings;

/// Runs `op` until it succeeds or `max_attempts` is exhausted, sleeping
/// `base_delay_ms * 2^attempt` between attempts. Returns the last error.
pub async fn with_retry<T, F, Fut>(settings: &RetrySettings, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = settings.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < attempts - 1 {
                    let delay = backoff_delay(settings.base_delay_ms, attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {:#}; retrying in {:?}",
                        label,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            },
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("{} was never attempted", label))
        .context(format!("{} failed after {} attempts", label, attempts)))
}

fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt)))
}
