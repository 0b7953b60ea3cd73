//! Exponential backoff with jitter and an elapsed-time ceiling.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Tuning for [`Backoff`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (before jitter).
    pub initial_interval: Duration,
    /// Upper bound for the un-jittered interval.
    pub max_interval: Duration,
    /// Total budget measured from the first attempt. No delay is handed out
    /// once it would push past this.
    pub max_elapsed: Duration,
    /// Growth factor applied after each delay.
    pub multiplier: f64,
    /// Jitter as a fraction of the interval, `0.0..=1.0`.
    pub randomization: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(300),
            max_interval: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(5),
            multiplier: 1.5,
            randomization: 0.5,
        }
    }
}

/// Per-operation backoff state. Create one per logical operation.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
}

impl Backoff {
    /// Start the clock for a new operation.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial_interval,
            policy,
            started: Instant::now(),
        }
    }

    /// Time since the operation started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The configured elapsed-time ceiling.
    pub fn budget(&self) -> Duration {
        self.policy.max_elapsed
    }

    /// Next delay, or `None` once sleeping for it would exceed the budget.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = jitter(self.current, self.policy.randomization);
        if self.elapsed().saturating_add(delay) > self.policy.max_elapsed {
            return None;
        }
        let grown = self.current.as_secs_f64() * self.policy.multiplier.max(1.0);
        self.current = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.policy.max_interval)
            .min(self.policy.max_interval);
        Some(delay)
    }
}

fn jitter(interval: Duration, randomization: f64) -> Duration {
    let factor = randomization.clamp(0.0, 1.0);
    if factor == 0.0 {
        return interval;
    }
    let base = interval.as_secs_f64();
    let delta = base * factor;
    let secs = rand::thread_rng().gen_range((base - delta)..=(base + delta));
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(interval)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn fixed(initial_ms: u64, max_ms: u64, elapsed_ms: u64) -> BackoffPolicy {
        BackoffPolicy {
            initial_interval: Duration::from_millis(initial_ms),
            max_interval: Duration::from_millis(max_ms),
            max_elapsed: Duration::from_millis(elapsed_ms),
            multiplier: 2.0,
            randomization: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn grows_and_caps() {
        let mut backoff = Backoff::new(fixed(100, 350, 60_000));
        let delays: Vec<u128> = (0..5)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 350, 350, 350]);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_budget_would_be_exceeded() {
        let mut backoff = Backoff::new(fixed(300, 2_000, 1_000));
        let first = backoff.next_delay().unwrap();
        tokio::time::sleep(first).await;
        let second = backoff.next_delay().unwrap();
        tokio::time::sleep(second).await;
        // 900ms elapsed, next would be 1200ms.
        assert_eq!(backoff.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_counts_external_sleeps() {
        let mut backoff = Backoff::new(fixed(300, 2_000, 5_000));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backoff.elapsed() >= Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let mut backoff = Backoff::new(policy.clone());
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(150), "{delay:?}");
            assert!(delay <= Duration::from_millis(450), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn huge_intervals_saturate_instead_of_panicking() {
        let mut backoff = Backoff::new(BackoffPolicy {
            initial_interval: Duration::from_secs(u64::MAX / 2),
            max_interval: Duration::MAX,
            max_elapsed: Duration::MAX,
            multiplier: 4.0,
            randomization: 0.5,
        });
        for _ in 0..4 {
            assert!(backoff.next_delay().is_some());
        }
    }

    #[test]
    fn default_policy_values() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_interval, Duration::from_millis(300));
        assert_eq!(policy.max_interval, Duration::from_secs(2));
        assert_eq!(policy.max_elapsed, Duration::from_secs(5));
    }
}
