//! Bounded polling
//!
//! The condition is first evaluated one interval after the call, then once
//! per interval. The deadline covers the whole loop, so it also interrupts a
//! wait or a condition evaluation that is still in flight.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Why polling stopped without the condition being met
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError<E> {
    /// Deadline elapsed first
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// Condition failed; not retried
    #[error("condition failed: {0}")]
    Condition(E),
}

/// Poll `condition` every `interval` until it returns `true`.
pub async fn poll<F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    poll_for(interval, timeout, || {
        let check = condition();
        async move { check.await.map(|done| done.then_some(())) }
    })
    .await
}

/// Poll `condition` every `interval` until it yields a value.
pub async fn poll_for<T, F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let attempts = async {
        loop {
            tokio::time::sleep(interval).await;
            match condition().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => return Err(PollError::Condition(e)),
            }
        }
    };

    match tokio::time::timeout(timeout, attempts).await {
        Ok(result) => result,
        Err(_) => Err(PollError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_waits_one_interval_before_first_check() {
        let start = Instant::now();
        let calls = AtomicU32::new(0);
        poll(SECOND, 10 * SECOND, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ()>(true) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= SECOND && start.elapsed() < 2 * SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_check() {
        let calls = AtomicU32::new(0);
        let result = poll(SECOND, 10 * SECOND, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, ()>(n == 3) }
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let start = Instant::now();
        let result = poll(SECOND, 5 * SECOND, || async { Ok::<_, ()>(false) }).await;

        assert_eq!(result, Err(PollError::Timeout(5 * SECOND)));
        assert!(start.elapsed() >= 5 * SECOND && start.elapsed() < 6 * SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_slow_condition() {
        let start = Instant::now();
        let result = poll(SECOND, 3 * SECOND, || async {
            tokio::time::sleep(60 * SECOND).await;
            Ok::<_, ()>(true)
        })
        .await;

        assert!(matches!(result, Err(PollError::Timeout(_))));
        assert!(start.elapsed() < 4 * SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = poll(SECOND, 10 * SECOND, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<bool, _>("list failed") }
        })
        .await;

        assert_eq!(result, Err(PollError::Condition("list failed")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_for_returns_value() {
        let calls = AtomicU32::new(0);
        let value = poll_for(SECOND, 10 * SECOND, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, ()>((n == 2).then_some(n * 10)) }
        })
        .await;

        assert_eq!(value, Ok(20));
    }
}
