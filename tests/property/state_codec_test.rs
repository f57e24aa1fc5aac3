// tests/property/state_codec_test.rs

//! Round-trip property of the state-file codec.

use proptest::prelude::*;

use palisade::core::fsm::NodeState;
use palisade::core::keeper::state_file::KeeperState;

fn arbitrary_role() -> impl Strategy<Value = NodeState> {
    prop::sample::select(vec![
        NodeState::Init,
        NodeState::Single,
        NodeState::WaitPrimary,
        NodeState::Primary,
        NodeState::ApplySettings,
        NodeState::PrepPromotion,
        NodeState::StopReplication,
        NodeState::WaitStandby,
        NodeState::CatchingUp,
        NodeState::Secondary,
        NodeState::Maintenance,
        NodeState::PrepareMaintenance,
        NodeState::WaitMaintenance,
        NodeState::Draining,
        NodeState::DemoteTimeout,
        NodeState::Demoted,
        NodeState::ReportLsn,
        NodeState::FastForward,
        NodeState::Dropped,
    ])
}

proptest! {
    #[test]
    fn test_any_state_round_trips_through_the_disk_layout(
        node_id in 0i64..1_000_000,
        group_id in 0i64..1_000,
        current_role in arbitrary_role(),
        assigned_role in arbitrary_role(),
        last_monitor_contact in any::<u64>(),
        last_secondary_contact in any::<u64>(),
        control_version in any::<u32>(),
        catalog_version in any::<u32>(),
        system_identifier in any::<u64>(),
    ) {
        let state = KeeperState {
            node_id,
            group_id,
            current_role,
            assigned_role,
            last_monitor_contact,
            last_secondary_contact,
            control_version,
            catalog_version,
            system_identifier,
        };
        let decoded = KeeperState::decode(&state.encode()).unwrap();
        prop_assert_eq!(decoded, state);
    }
}
