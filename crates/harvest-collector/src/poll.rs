//! Bounded polling.
//!
//! Every wait in the collector goes through one of these two loops so that
//! nothing can spin forever on a page that never settles.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Limits for [`poll_until_stable`].
#[derive(Debug, Clone, Copy)]
pub struct StabilitySettings {
    /// Pause between samples
    pub interval: Duration,
    /// Consecutive unchanged samples that count as stable
    pub stability_threshold: u32,
    /// Hard cap on samples
    pub max_attempts: u32,
}

/// How a stability poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Stable { value: T, attempts: u32 },
    Exhausted { value: T, attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Stable { value, .. } | Self::Exhausted { value, .. } => value,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Stable { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Stable { .. })
    }
}

/// Sample repeatedly until the value stops changing.
///
/// The first sample is the baseline. The poll is stable once
/// `stability_threshold` consecutive samples equal the one before them, and
/// gives up after `max_attempts` samples.
pub async fn poll_until_stable<T, E, F, Fut>(
    settings: StabilitySettings,
    mut sample: F,
) -> Result<PollOutcome<T>, E>
where
    T: PartialEq,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut previous = sample().await?;
    let mut attempts = 1;
    let mut unchanged = 0;

    while attempts < max_attempts {
        if !settings.interval.is_zero() {
            tokio::time::sleep(settings.interval).await;
        }

        let value = sample().await?;
        attempts += 1;

        if value == previous {
            unchanged += 1;
        } else {
            unchanged = 0;
        }
        previous = value;

        if unchanged >= settings.stability_threshold {
            return Ok(PollOutcome::Stable {
                value: previous,
                attempts,
            });
        }
    }

    Ok(PollOutcome::Exhausted {
        value: previous,
        attempts,
    })
}

/// Check every `interval` until the check returns true or `timeout` elapses.
///
/// The check always runs at least once.
pub async fn poll_until<E, F, Fut>(interval: Duration, timeout: Duration, mut check: F) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    // An unrepresentable deadline never expires
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if check().await? {
            return Ok(true);
        }
        let Some(deadline) = deadline else {
            tokio::time::sleep(interval).await;
            continue;
        };
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;

    fn settings(threshold: u32, max: u32) -> StabilitySettings {
        StabilitySettings {
            interval: Duration::from_millis(100),
            stability_threshold: threshold,
            max_attempts: max,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_after_threshold() {
        let values = [1, 2, 3, 3, 3, 3];
        let i = Cell::new(0);
        let outcome = poll_until_stable(settings(2, 10), || {
            let v = values[i.get().min(values.len() - 1)];
            i.set(i.get() + 1);
            async move { Ok::<_, Infallible>(v) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Stable { value: 3, attempts: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_when_always_changing() {
        let i = Cell::new(0u32);
        let outcome = poll_until_stable(settings(2, 4), || {
            i.set(i.get() + 1);
            let v = i.get();
            async move { Ok::<_, Infallible>(v) }
        })
        .await
        .unwrap();

        assert!(!outcome.is_stable());
        assert_eq!(outcome.attempts(), 4);
        assert_eq!(*outcome.value(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_propagates() {
        let result: Result<PollOutcome<u32>, &str> =
            poll_until_stable(settings(2, 4), || async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_true() {
        let start = Instant::now();
        let calls = Cell::new(0);
        let hit = poll_until(Duration::from_millis(500), Duration::from_secs(10), || {
            calls.set(calls.get() + 1);
            let done = calls.get() == 3;
            async move { Ok::<_, Infallible>(done) }
        })
        .await
        .unwrap();

        assert!(hit);
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let start = Instant::now();
        let hit = poll_until(Duration::from_millis(500), Duration::from_secs(2), || async {
            Ok::<_, Infallible>(false)
        })
        .await
        .unwrap();

        assert!(!hit);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
