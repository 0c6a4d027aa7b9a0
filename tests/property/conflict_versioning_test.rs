// tests/property/conflict_versioning_test.rs

//! Property: under any sequence of `LastWriteWins` writes to the same
//! key, the version returned by each successful resolution is strictly
//! greater than the one before it, regardless of payload content or
//! sequence length.

use crate::test_helpers::Harness;
use playhub_core::conflict::ConflictPolicy;
use playhub_core::sync::entity::EntityKind;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        ..ProptestConfig::default()
    })]

    #[test]
    fn versions_strictly_increase_regardless_of_payload_content(
        payloads in prop::collection::vec(".{0,64}", 1..20)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let mut last_version = 0u64;
            for payload in payloads {
                let out = h
                    .conflict
                    .check_and_write(
                        EntityKind::generic(),
                        "prop-key",
                        0,
                        payload.into_bytes(),
                        "writer",
                        ConflictPolicy::LastWriteWins,
                    )
                    .await
                    .unwrap();
                assert!(out.version > last_version);
                last_version = out.version;
            }
        });
    }

    #[test]
    fn optimistic_lock_never_advances_the_version_on_a_stale_expectation(
        attempts in 1usize..15
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let first = h
                .conflict
                .check_and_write(EntityKind::generic(), "prop-key-2", 0, b"seed".to_vec(), "w0", ConflictPolicy::OptimisticLock)
                .await
                .unwrap();
            assert_eq!(first.version, 1);

            for i in 0..attempts {
                let out = h
                    .conflict
                    .check_and_write(
                        EntityKind::generic(),
                        "prop-key-2",
                        0,
                        format!("stale-{i}").into_bytes(),
                        "w",
                        ConflictPolicy::OptimisticLock,
                    )
                    .await
                    .unwrap();
                assert!(out.has_conflict);
                assert_eq!(out.version, 1);
            }
        });
    }
}
