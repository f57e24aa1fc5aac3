// tests/property/retry_jitter_test.rs

//! Bounds of the decorrelated-jitter retry sleep.

use std::time::Duration;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use palisade::core::monitor::retry::decorrelated_jitter;

proptest! {
    #[test]
    fn test_sleep_is_always_bounded_by_the_cap(
        seed in any::<u64>(),
        base_ms in 1u64..5_000,
        cap_ms in 1u64..60_000,
        rounds in 1usize..50,
    ) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let base = Duration::from_millis(base_ms);
        let cap = Duration::from_millis(cap_ms);
        let mut previous = Duration::ZERO;
        for _ in 0..rounds {
            let sleep = decorrelated_jitter(previous, base, cap, &mut rng);
            prop_assert!(sleep <= cap);
            previous = sleep;
        }
    }

    #[test]
    fn test_sleep_never_undershoots_base_before_the_cap(
        seed in any::<u64>(),
        base_ms in 1u64..2_000,
        rounds in 1usize..50,
    ) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let base = Duration::from_millis(base_ms);
        // A cap far above base: the lower bound must then always hold.
        let cap = Duration::from_millis(base_ms * 1000);
        let mut previous = Duration::ZERO;
        for _ in 0..rounds {
            let sleep = decorrelated_jitter(previous, base, cap, &mut rng);
            prop_assert!(sleep >= base);
            previous = sleep;
        }
    }

    #[test]
    fn test_sleep_stays_within_three_times_the_previous(
        seed in any::<u64>(),
        base_ms in 1u64..1_000,
        rounds in 2usize..50,
    ) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let base = Duration::from_millis(base_ms);
        let cap = Duration::from_secs(3600);
        let mut previous = decorrelated_jitter(Duration::ZERO, base, cap, &mut rng);
        for _ in 0..rounds {
            let sleep = decorrelated_jitter(previous, base, cap, &mut rng);
            let upper = std::cmp::max(previous * 3, base);
            prop_assert!(sleep <= upper.min(cap));
            previous = sleep;
        }
    }
}
