// ABOUTME: Bounded exponential backoff for registry operations.
// ABOUTME: Retries only errors the registry backend marks as transient.

use std::future::Future;

use crate::backend::RegistryError;
use crate::config::RetryConfig;

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// `max_attempts` counts the first try; zero is treated as one.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, RegistryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what,
                    attempt,
                    max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
