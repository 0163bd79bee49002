use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential { factor: f64, max_delay_ms: u64 },
}

/// How often and how patiently an operation is retried.
///
/// `max_attempts = None` keeps retrying until the operation succeeds or the
/// surrounding task is cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay_ms: delay.as_millis() as u64,
            backoff: Backoff::Fixed,
        }
    }

    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            delay_ms: delay.as_millis() as u64,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some()
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => Duration::from_millis(self.delay_ms),
            Backoff::Exponential {
                factor,
                max_delay_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(64) as i32;
                let scaled_ms = self.delay_ms as f64 * factor.max(1.0).powi(exponent);

                if !scaled_ms.is_finite() || scaled_ms >= max_delay_ms as f64 {
                    Duration::from_millis(max_delay_ms)
                } else {
                    Duration::from_millis(scaled_ms.round() as u64)
                }
            }
        }
    }

    pub fn attempts(&self) -> Attempts<'_> {
        Attempts {
            policy: self,
            made: 0,
        }
    }
}

/// Attempt counter for one run of a retry loop.
///
/// ```ignore
/// let mut attempts = policy.attempts();
/// loop {
///     attempts.begin();
///     match operation().await {
///         Ok(value) => return Ok(value),
///         Err(_) if attempts.wait().await => continue,
///         Err(e) => return Err(e),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Attempts<'a> {
    policy: &'a RetryPolicy,
    made: u32,
}

impl Attempts<'_> {
    /// Marks the start of a new attempt and returns its 1-based number.
    pub fn begin(&mut self) -> u32 {
        self.made = self.made.saturating_add(1);
        self.made
    }

    pub fn made(&self) -> u32 {
        self.made
    }

    pub fn exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.made >= max)
    }

    /// Sleeps for the policy delay. Returns `false` without sleeping once the
    /// attempt budget is spent.
    pub async fn wait(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }

        let delay = self.policy.delay_for(self.made);
        if delay.is_zero() {
            // Keep tight retry loops cancellable.
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_does_not_grow() {
        let policy = RetryPolicy::unbounded(Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy = RetryPolicy::unbounded(Duration::from_millis(100)).with_backoff(
            Backoff::Exponential {
                factor: 2.0,
                max_delay_ms: 1000,
            },
        );

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(500), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_stops_after_max_attempts() {
        let policy = RetryPolicy::bounded(3, Duration::from_secs(1));
        let mut attempts = policy.attempts();
        let started = tokio::time::Instant::now();

        let mut runs = 0;
        loop {
            attempts.begin();
            runs += 1;
            if !attempts.wait().await {
                break;
            }
        }

        assert_eq!(runs, 3);
        assert_eq!(attempts.made(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unbounded_policy_keeps_going() {
        let policy = RetryPolicy::unbounded(Duration::ZERO);
        let mut attempts = policy.attempts();

        for _ in 0..1000 {
            attempts.begin();
            assert!(attempts.wait().await);
        }
        assert!(!attempts.exhausted());
    }

    #[test]
    fn policy_reads_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            max_attempts = 4
            delay_ms = 250
            backoff = { kind = "exponential", factor = 1.5, max_delay_ms = 2000 }
            "#,
        )
        .unwrap();

        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                factor: 1.5,
                max_delay_ms: 2000
            }
        );

        let unbounded: RetryPolicy = toml::from_str("delay_ms = 0").unwrap();
        assert!(!unbounded.is_bounded());
        assert_eq!(unbounded.backoff, Backoff::Fixed);
    }
}
