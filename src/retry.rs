//! Bounded exponential backoff for transient remote failures.
//!
//! Modeled as an explicit state machine over (attempts made, wait time
//! spent) rather than ad hoc sleeps in the import loop: the importer asks
//! for the next delay after each transient failure and stops when the
//! policy says the budget is gone. With a zero jitter factor the delay
//! sequence is fully deterministic, which is what the tests use.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Retry policy for one message: attempt and wait budgets plus the
/// shape of the delay curve.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum remote calls per message, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
    /// Total sleep budget across all retries of one message.
    pub max_elapsed: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
    /// Jitter factor in `[0.0, 1.0]`; each delay is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Try once, never wait. Used for permanent-failure style dry paths
    /// and as a building block in tests.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_elapsed: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: cfg.initial_delay(),
            max_delay: cfg.max_delay(),
            max_elapsed: cfg.max_elapsed(),
            multiplier: if cfg.multiplier < 1.0 { 1.0 } else { cfg.multiplier },
            jitter: cfg.jitter.clamp(0.0, 1.0),
        }
    }
}

/// Per-message backoff state. One instance lives for the duration of one
/// message's attempt sequence and is discarded afterwards.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
    elapsed: Duration,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 1, // the initial call is attempt one
            elapsed: Duration::ZERO,
            current_delay: policy.initial_delay,
        }
    }

    /// Remote calls made so far (assuming the caller calls the remote
    /// once before each `next_delay`).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// After a transient failure: how long to wait before the next
    /// attempt, or `None` when the attempt or wait budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }

        let delay = jittered(self.current_delay, self.policy.jitter);
        if self.elapsed + delay > self.policy.max_elapsed {
            return None;
        }

        self.attempts += 1;
        self.elapsed += delay;
        self.current_delay = Duration::from_secs_f64(
            (self.current_delay.as_secs_f64() * self.policy.multiplier)
                .min(self.policy.max_delay.as_secs_f64()),
        );
        Some(delay)
    }
}

/// Scale `delay` by a random factor in `[1 - jitter, 1 + jitter]`.
fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
