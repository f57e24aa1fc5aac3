use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use palisade::core::monitor::retry::{RetryPolicy, RetryState, decorrelated_jitter};

#[test]
fn test_jitter_never_exceeds_cap() {
    let mut rng = SmallRng::seed_from_u64(42);
    let base = Duration::from_millis(500);
    let cap = Duration::from_secs(2);
    let mut previous = Duration::ZERO;
    for _ in 0..1000 {
        let sleep = decorrelated_jitter(previous, base, cap, &mut rng);
        assert!(sleep <= cap, "sleep {sleep:?} exceeded cap {cap:?}");
        previous = sleep;
    }
}

#[test]
fn test_jitter_at_least_base_until_capped() {
    let mut rng = SmallRng::seed_from_u64(7);
    let base = Duration::from_millis(100);
    let cap = Duration::from_secs(5);
    let mut previous = Duration::ZERO;
    for _ in 0..100 {
        let sleep = decorrelated_jitter(previous, base, cap, &mut rng);
        assert!(sleep >= base.min(cap));
        previous = sleep;
    }
}

#[test]
fn test_jitter_deterministic_with_same_seed() {
    let base = Duration::from_millis(250);
    let cap = Duration::from_secs(3);

    let mut rng_a = SmallRng::seed_from_u64(99);
    let mut rng_b = SmallRng::seed_from_u64(99);
    let mut previous_a = Duration::ZERO;
    let mut previous_b = Duration::ZERO;
    for _ in 0..50 {
        previous_a = decorrelated_jitter(previous_a, base, cap, &mut rng_a);
        previous_b = decorrelated_jitter(previous_b, base, cap, &mut rng_b);
        assert_eq!(previous_a, previous_b);
    }
}

#[test]
fn test_main_loop_policy_never_retries() {
    let mut state = RetryState::new(RetryPolicy::main_loop());
    assert!(!state.expired(false), "the first attempt is always allowed");
    state.next_sleep();
    assert!(state.expired(false), "no retry after the first attempt");
}

#[test]
fn test_asked_to_stop_expires_any_policy() {
    let state = RetryState::new(RetryPolicy::monitor_interactive());
    assert!(!state.expired(false));
    assert!(state.expired(true));
}

#[test]
fn test_bounded_attempts_expire() {
    let policy = RetryPolicy {
        max_total_time: Duration::from_secs(3600),
        max_attempts: 3,
        base_sleep: Duration::from_millis(1),
        max_sleep: Duration::from_millis(2),
    };
    let mut state = RetryState::with_rng(policy, SmallRng::seed_from_u64(1));
    for _ in 0..3 {
        assert!(!state.expired(false));
        state.next_sleep();
    }
    assert_eq!(state.attempts(), 3);
    assert!(state.expired(false));
}

#[test]
fn test_elapsed_total_time_expires() {
    let policy = RetryPolicy {
        max_total_time: Duration::ZERO,
        max_attempts: -1,
        base_sleep: Duration::from_millis(1),
        max_sleep: Duration::from_millis(2),
    };
    let state = RetryState::with_rng(policy, SmallRng::seed_from_u64(1));
    assert!(state.expired(false));
}

#[test]
fn test_named_policies_match_their_budgets() {
    let interactive = RetryPolicy::interactive(Duration::from_secs(7));
    assert_eq!(interactive.max_total_time, Duration::from_secs(7));

    let monitor = RetryPolicy::monitor_interactive();
    assert_eq!(monitor.max_total_time, Duration::from_secs(15 * 60));
    assert_eq!(monitor.max_attempts, -1);
    assert_eq!(monitor.base_sleep, Duration::from_secs(1));
    assert_eq!(monitor.max_sleep, Duration::from_secs(5));

    let init = RetryPolicy::init();
    assert_eq!(init.max_total_time, Duration::from_secs(15 * 60));
    assert_eq!(init.max_sleep, Duration::from_secs(2));

    let main_loop = RetryPolicy::main_loop();
    assert_eq!(main_loop.max_attempts, 0);
}
