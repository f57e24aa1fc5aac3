// tests/property/hba_diff_test.rs

//! Invariants of the peer-set diff feeding access-rule maintenance.

use proptest::prelude::*;

use palisade::core::db::Lsn;
use palisade::core::monitor::NodeAddress;
use palisade::core::resources::hba::diff_peers;

fn arbitrary_peers() -> impl Strategy<Value = Vec<NodeAddress>> {
    prop::collection::btree_map(1i64..40, "[a-z0-9.]{1,16}", 0..10).prop_map(|peers| {
        peers
            .into_iter()
            .map(|(node_id, host)| NodeAddress {
                node_id,
                name: format!("node_{node_id}"),
                host,
                port: 5432,
                lsn: Lsn::ZERO,
                is_primary: false,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn test_diff_of_a_set_with_itself_is_empty(peers in arbitrary_peers()) {
        prop_assert!(diff_peers(&peers, &peers).is_empty());
    }

    #[test]
    fn test_diff_only_ever_reports_current_peers(
        old in arbitrary_peers(),
        new in arbitrary_peers(),
    ) {
        for changed in diff_peers(&old, &new) {
            prop_assert!(new.iter().any(|peer| peer.node_id == changed.node_id));
        }
    }

    #[test]
    fn test_diff_reports_every_genuinely_new_peer(
        old in arbitrary_peers(),
        new in arbitrary_peers(),
    ) {
        let changed = diff_peers(&old, &new);
        for peer in &new {
            let is_new = !old.iter().any(|p| p.node_id == peer.node_id);
            if is_new {
                prop_assert!(changed.iter().any(|c| c.node_id == peer.node_id));
            }
        }
    }

    #[test]
    fn test_diff_is_idempotent_after_adoption(
        old in arbitrary_peers(),
        new in arbitrary_peers(),
    ) {
        // Once the new set has been adopted as the snapshot, a repeat diff
        // finds nothing left to do.
        let _ = diff_peers(&old, &new);
        prop_assert!(diff_peers(&new, &new).is_empty());
    }
}
