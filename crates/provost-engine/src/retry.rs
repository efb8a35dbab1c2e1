//! Bounded retry with a fixed sleep, collecting every attempt's error.

use std::time::Duration;

/// Runs `operation` up to `attempts` times, sleeping between attempts.
/// Returns the first success, or every collected error once the budget
/// is spent.
pub async fn with_retries<F, Fut, T, E>(
    attempts: u32,
    sleep: Duration,
    mut operation: F,
) -> Result<T, Vec<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut errors = Vec::new();
    for attempt in 1..=attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => errors.push(e),
        }
        if attempt < attempts {
            tokio::time::sleep(sleep).await;
        }
    }
    Err(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately() {
        let result: Result<i32, Vec<&str>> =
            with_retries(3, Duration::ZERO, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, Vec<&str>> = with_retries(3, Duration::ZERO, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("fail")
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_collects_errors() {
        let result: Result<i32, Vec<&str>> =
            with_retries(3, Duration::ZERO, || async { Err("always") }).await;
        assert_eq!(result.unwrap_err().len(), 3);
    }
}
