// src/core/monitor/retry.rs

//! Connection retry with decorrelated jitter.
//!
//! The jitter computation is a pure function over
//! `(previous sleep, base, cap, rng)` so the bounds can be tested
//! deterministically with a seeded generator.

use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// How often and for how long an operation may be retried. The policy is
/// orthogonal to the operation: each call site picks one of the named
/// constructors below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total time budget. Once elapsed, the policy is expired.
    pub max_total_time: Duration,
    /// Attempt budget: 0 means no retry at all, negative means unbounded.
    pub max_attempts: i32,
    /// Lower bound for any computed sleep.
    pub base_sleep: Duration,
    /// Upper bound for any computed sleep.
    pub max_sleep: Duration,
}

impl RetryPolicy {
    /// The main loop never retries: a single failure returns control to the
    /// loop, which tries again next tick anyway.
    pub fn main_loop() -> Self {
        Self {
            max_total_time: Duration::ZERO,
            max_attempts: 0,
            base_sleep: Duration::ZERO,
            max_sleep: Duration::ZERO,
        }
    }

    /// Interactive commands are bounded by the configured connect timeout.
    pub fn interactive(connect_timeout: Duration) -> Self {
        Self {
            max_total_time: connect_timeout,
            max_attempts: -1,
            base_sleep: Duration::from_millis(100),
            max_sleep: Duration::from_secs(2),
        }
    }

    /// Waiting out a monitor restart: 15 minutes, unbounded attempts,
    /// 1–5 s jittered sleeps.
    pub fn monitor_interactive() -> Self {
        Self {
            max_total_time: Duration::from_secs(15 * 60),
            max_attempts: -1,
            base_sleep: Duration::from_secs(1),
            max_sleep: Duration::from_secs(5),
        }
    }

    /// Node registration: 15 minutes, unbounded attempts, 2 s cap. Used while
    /// the monitor serializes concurrent standby registrations.
    pub fn init() -> Self {
        Self {
            max_total_time: Duration::from_secs(15 * 60),
            max_attempts: -1,
            base_sleep: Duration::from_millis(500),
            max_sleep: Duration::from_secs(2),
        }
    }
}

/// Computes the next sleep: `min(cap, uniform(base, previous * 3))`.
/// Nondecreasing in expectation until the cap, never above the cap.
pub fn decorrelated_jitter(
    previous: Duration,
    base: Duration,
    cap: Duration,
    rng: &mut impl Rng,
) -> Duration {
    let base_ms = base.as_millis() as u64;
    let upper_ms = (previous.as_millis() as u64).saturating_mul(3).max(base_ms);
    let sleep_ms = if upper_ms > base_ms {
        rng.gen_range(base_ms..=upper_ms)
    } else {
        base_ms
    };
    Duration::from_millis(sleep_ms).min(cap)
}

/// Mutable retry bookkeeping for one retried operation.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    started_at: Instant,
    attempts: u32,
    previous_sleep: Duration,
    rng: SmallRng,
}

impl RetryState {
    /// Starts a fresh retry round, seeded from the OS entropy source.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_rng(policy, SmallRng::from_entropy())
    }

    /// Deterministic variant for tests.
    pub fn with_rng(policy: RetryPolicy, rng: SmallRng) -> Self {
        Self {
            policy,
            started_at: Instant::now(),
            attempts: 0,
            previous_sleep: Duration::ZERO,
            rng,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the policy allows another attempt. `asked_to_stop` is the
    /// stop-or-reload signal flag, which expires every policy immediately.
    pub fn expired(&self, asked_to_stop: bool) -> bool {
        if asked_to_stop {
            return true;
        }
        if self.policy.max_attempts == 0 {
            return self.attempts > 0;
        }
        if self.policy.max_attempts > 0 && self.attempts >= self.policy.max_attempts as u32 {
            return true;
        }
        self.started_at.elapsed() >= self.policy.max_total_time
    }

    /// Records an attempt and returns how long to sleep before the next one.
    pub fn next_sleep(&mut self) -> Duration {
        self.attempts += 1;
        let sleep = decorrelated_jitter(
            self.previous_sleep,
            self.policy.base_sleep,
            self.policy.max_sleep,
            &mut self.rng,
        );
        self.previous_sleep = sleep;
        sleep
    }
}
