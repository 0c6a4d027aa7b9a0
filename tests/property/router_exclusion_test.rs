// tests/property/router_exclusion_test.rs

//! Property: for any set of registered receivers and any subset of them
//! named in a message's exclusion list, a broadcast never delivers to an
//! excluded receiver, and delivers to every other online one.

use crate::test_helpers::Harness;
use playhub_core::realtime::router::fake::ChannelReceiver;
use playhub_core::realtime::{RoutedMessage, TargetKind};
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        ..ProptestConfig::default()
    })]

    #[test]
    fn excluded_receivers_never_get_the_broadcast(
        total in 2usize..10,
        exclude_mask in prop::collection::vec(any::<bool>(), 2..10)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let mask = &exclude_mask[..total.min(exclude_mask.len())];
            let mut receivers = Vec::new();
            let mut excluded_ids = HashSet::new();

            for (i, excluded) in mask.iter().enumerate() {
                let id = format!("conn-{i}");
                let (receiver, rx) = ChannelReceiver::new();
                h.router.register_receiver(id.clone(), receiver);
                if *excluded {
                    excluded_ids.insert(id.clone());
                }
                receivers.push((id, rx));
            }

            let message = RoutedMessage::new("m", b"x".to_vec(), TargetKind::Broadcast)
                .with_exclusions(excluded_ids.iter().cloned().collect());
            h.router.route(&message).await.unwrap();

            for (id, mut rx) in receivers {
                let got = rx.try_recv().is_ok();
                if excluded_ids.contains(&id) {
                    assert!(!got, "excluded receiver {id} should not have been delivered to");
                } else {
                    assert!(got, "non-excluded receiver {id} should have been delivered to");
                }
            }
        });
    }
}
