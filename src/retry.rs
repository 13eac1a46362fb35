//! Bounded fixed-delay retry.
//!
//! One trigger starts a cycle. A failed attempt schedules another attempt
//! after a fixed delay until `max_retries` retries have been scheduled; the
//! next failure ends the cycle. A new trigger always starts a fresh cycle.
//! There is no exponential growth and no jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            delay: RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Fetching,
    Succeeded,
    /// Number of retries scheduled so far in this cycle.
    Failed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    state: RetryState,
    retries: u32,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: RetryState::Idle,
            retries: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn retries_scheduled(&self) -> u32 {
        self.retries
    }

    /// Start a new cycle, whatever the previous one ended in.
    pub fn trigger(&mut self) {
        self.retries = 0;
        self.state = RetryState::Fetching;
    }

    /// Succeeded resets the counter and settles back to Idle.
    pub fn on_success(&mut self) -> RetryState {
        self.retries = 0;
        self.state = RetryState::Idle;
        RetryState::Succeeded
    }

    pub fn on_failure(&mut self) -> RetryDecision {
        if self.retries < self.config.max_retries {
            self.retries += 1;
            self.state = RetryState::Failed(self.retries);
            RetryDecision::RetryAfter(self.config.delay)
        } else {
            self.state = RetryState::Failed(self.retries);
            RetryDecision::GiveUp
        }
    }

    /// The scheduled delay elapsed and the next attempt is starting.
    pub fn begin_retry(&mut self) {
        self.state = RetryState::Fetching;
    }

    /// True once the cycle has given up.
    pub fn is_exhausted(&self) -> bool {
        self.state == RetryState::Failed(self.config.max_retries)
            && self.retries >= self.config.max_retries
    }
}

/// Run one retry cycle of `attempt`.
///
/// `still_wanted` is checked after every delay; once it returns false the
/// cycle stops and the last error is returned. Failures are logged; the final
/// one is logged as a give-up and returned.
pub async fn run_with_retry<T, E, F, Fut, W>(
    policy: &mut RetryPolicy,
    label: &str,
    mut attempt: F,
    still_wanted: W,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    W: Fn() -> bool,
{
    policy.trigger();
    loop {
        match attempt().await {
            Ok(value) => {
                policy.on_success();
                return Ok(value);
            }
            Err(e) => match policy.on_failure() {
                RetryDecision::RetryAfter(delay) => {
                    crate::dlog!(
                        "{label}: attempt failed ({e}), retry {} in {}ms",
                        policy.retries_scheduled(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    if !still_wanted() {
                        return Err(e);
                    }
                    policy.begin_retry();
                }
                RetryDecision::GiveUp => {
                    crate::dlog!(
                        "{label}: giving up after {} retries: {e}",
                        policy.retries_scheduled()
                    );
                    return Err(e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_failures_schedule_three_retries_then_stop() {
        let mut policy = RetryPolicy::new(RetryConfig::default());
        policy.trigger();
        assert_eq!(policy.state(), RetryState::Fetching);

        for n in 1..=3 {
            assert_eq!(policy.on_failure(), RetryDecision::RetryAfter(RETRY_DELAY));
            assert_eq!(policy.state(), RetryState::Failed(n));
            policy.begin_retry();
        }
        assert_eq!(policy.on_failure(), RetryDecision::GiveUp);
        assert_eq!(policy.state(), RetryState::Failed(MAX_RETRIES));
        assert!(policy.is_exhausted());
    }

    #[test]
    fn success_resets_and_new_trigger_restarts_cycle() {
        let mut policy = RetryPolicy::new(RetryConfig::default());
        policy.trigger();
        policy.on_failure();
        assert_eq!(policy.on_success(), RetryState::Succeeded);
        assert_eq!(policy.state(), RetryState::Idle);
        assert_eq!(policy.retries_scheduled(), 0);

        for _ in 0..4 {
            policy.on_failure();
        }
        assert!(policy.is_exhausted());
        policy.trigger();
        assert_eq!(policy.state(), RetryState::Fetching);
        assert_eq!(
            policy.on_failure(),
            RetryDecision::RetryAfter(RETRY_DELAY)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_retry_waits_fixed_delay() {
        let start = tokio::time::Instant::now();
        let mut attempts = Vec::new();
        let mut policy = RetryPolicy::new(RetryConfig::default());

        let result: Result<(), String> = run_with_retry(
            &mut policy,
            "test",
            || {
                attempts.push(start.elapsed());
                async { Err("down".to_string()) }
            },
            || true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            attempts,
            vec![
                Duration::ZERO,
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(6000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_retry_stops_when_superseded() {
        let mut calls = 0;
        let mut policy = RetryPolicy::new(RetryConfig::default());
        let result: Result<(), &str> = run_with_retry(
            &mut policy,
            "test",
            || {
                calls += 1;
                async { Err("down") }
            },
            || false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
