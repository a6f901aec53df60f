//! Retry with exponential backoff for transient remote-request failures.

use std::time::Duration;

use rand::Rng;

/// Delay before the given 1-indexed retry attempt, per §5: jittered
/// exponential backoff, capped, for transient HTTP failures (distinct
/// from the State Store's fixed fetch/project backoff schedule).
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter_factor: f64) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max
    } else {
        base.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX)).min(max)
    };

    let jitter_range = delay.as_secs_f64() * jitter_factor;
    let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
}

/// Run `attempt` up to `max_attempts` times, retrying only when the
/// result's error is transient (per `is_transient`), sleeping a jittered
/// exponential backoff between attempts.
pub async fn with_retry<T, E, F, Fut>(max_attempts: u32, is_transient: impl Fn(&E) -> bool, mut attempt: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for try_count in 1..=max_attempts {
        match attempt(try_count).await {
            Ok(value) => return Ok(value),
            Err(err) if try_count < max_attempts && is_transient(&err) => {
                let delay = backoff_delay(try_count, Duration::from_millis(200), Duration::from_secs(30), 0.2);
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("loop always assigns an error before exiting without returning"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(100);
        assert_eq!(backoff_delay(1, base, max, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, base, max, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, base, max, 0.0), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let delay = backoff_delay(20, Duration::from_secs(1), Duration::from_secs(30), 0.0);
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_the_limit() {
        let mut calls = 0;
        let result: Result<(), &str> = with_retry(3, |_| true, |attempt| {
            calls += 1;
            async move { if attempt < 3 { Err("transient") } else { Ok(()) } }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let mut calls = 0;
        let result: Result<(), &str> = with_retry(3, |_| false, |_| {
            calls += 1;
            async move { Err("permanent") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
