// tests/property/lock_fencing_test.rs

//! Property: across any sequence of competing acquire attempts for the
//! same key, at most one caller ever holds the lock at a time, and a
//! stale token can never release or renew a lock it no longer owns.

use crate::test_helpers::Harness;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    })]

    #[test]
    fn at_most_one_winner_among_n_concurrent_try_acquires(n in 2usize..12) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let mut winners = 0;
            let mut guards = Vec::new();
            for _ in 0..n {
                if let Some(guard) = h.lock.try_acquire("contested", Duration::from_secs(5)).await.unwrap() {
                    winners += 1;
                    guards.push(guard);
                }
            }
            assert_eq!(winners, 1);
            for guard in guards {
                let _ = guard.release().await;
            }
        });
    }

    #[test]
    fn a_released_lock_can_be_won_again_but_the_old_token_never_releases_it_twice(
        rounds in 1usize..6
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let mut previous_tokens = Vec::new();
            for _ in 0..rounds {
                let guard = h.lock.try_acquire("rotating", Duration::from_secs(5)).await.unwrap().unwrap();
                let token = guard.token().to_string();
                assert!(guard.release().await.unwrap());
                previous_tokens.push(token);
            }
            for token in &previous_tokens {
                assert!(!h.lock.release("rotating", token).await.unwrap());
            }
        });
    }
}
