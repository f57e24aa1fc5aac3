use std::str::FromStr;

use strum::IntoEnumIterator;

use palisade::core::fsm::{NodeState, TransitionAction, find_transition};

#[test]
fn test_wire_names_are_stable() {
    let expected = [
        (NodeState::Init, "INIT"),
        (NodeState::Single, "SINGLE"),
        (NodeState::WaitPrimary, "WAIT_PRIMARY"),
        (NodeState::Primary, "PRIMARY"),
        (NodeState::ApplySettings, "APPLY_SETTINGS"),
        (NodeState::PrepPromotion, "PREP_PROMOTION"),
        (NodeState::StopReplication, "STOP_REPLICATION"),
        (NodeState::WaitStandby, "WAIT_STANDBY"),
        (NodeState::CatchingUp, "CATCHINGUP"),
        (NodeState::Secondary, "SECONDARY"),
        (NodeState::Maintenance, "MAINTENANCE"),
        (NodeState::PrepareMaintenance, "PREPARE_MAINTENANCE"),
        (NodeState::WaitMaintenance, "WAIT_MAINTENANCE"),
        (NodeState::Draining, "DRAINING"),
        (NodeState::DemoteTimeout, "DEMOTE_TIMEOUT"),
        (NodeState::Demoted, "DEMOTED"),
        (NodeState::ReportLsn, "REPORT_LSN"),
        (NodeState::FastForward, "FAST_FORWARD"),
        (NodeState::Dropped, "DROPPED"),
        (NodeState::NoState, "NO_STATE"),
        (NodeState::AnyState, "ANY_STATE"),
    ];
    for (state, name) in expected {
        assert_eq!(state.to_string(), name);
        assert_eq!(NodeState::from_str(name).unwrap(), state);
    }
}

#[test]
fn test_every_state_round_trips_through_its_wire_name() {
    for state in NodeState::iter() {
        let name = state.to_string();
        assert_eq!(NodeState::from_str(&name).unwrap(), state);
    }
}

#[test]
fn test_every_state_round_trips_through_its_disk_code() {
    for state in NodeState::iter() {
        let code = state.disk_code();
        assert_eq!(NodeState::from_disk_code(code).unwrap(), state);
    }
}

#[test]
fn test_unknown_disk_code_is_rejected() {
    assert!(NodeState::from_disk_code(200).is_err());
}

#[test]
fn test_down_states() {
    for state in [
        NodeState::Draining,
        NodeState::DemoteTimeout,
        NodeState::Demoted,
    ] {
        assert!(state.implies_database_down());
    }
    assert!(!NodeState::Primary.implies_database_down());
    assert!(!NodeState::Secondary.implies_database_down());
    assert!(!NodeState::Maintenance.implies_database_down());
}

#[test]
fn test_terminal_and_initial_states() {
    assert!(NodeState::Init.is_initial());
    assert!(NodeState::Dropped.is_terminal());
    assert!(!NodeState::Primary.is_terminal());
}

#[test]
fn test_bootstrap_transition() {
    let rule = find_transition(NodeState::Init, NodeState::Single).unwrap();
    assert_eq!(rule.action, TransitionAction::BootstrapAsSingle);
}

#[test]
fn test_demotion_transitions_stop_the_database() {
    for goal in [
        NodeState::Draining,
        NodeState::DemoteTimeout,
        NodeState::Demoted,
    ] {
        let rule = find_transition(NodeState::Primary, goal).unwrap();
        assert_eq!(rule.action, TransitionAction::StopDatabase);
    }
}

#[test]
fn test_failover_path_for_the_promoted_candidate() {
    assert_eq!(
        find_transition(NodeState::Secondary, NodeState::PrepPromotion)
            .unwrap()
            .action,
        TransitionAction::PreparePromotion
    );
    assert_eq!(
        find_transition(NodeState::PrepPromotion, NodeState::StopReplication)
            .unwrap()
            .action,
        TransitionAction::StopReplicationStage
    );
    assert_eq!(
        find_transition(NodeState::StopReplication, NodeState::WaitPrimary)
            .unwrap()
            .action,
        TransitionAction::PromoteStandby
    );
}

#[test]
fn test_failover_path_for_the_losing_candidate() {
    assert_eq!(
        find_transition(NodeState::Secondary, NodeState::ReportLsn)
            .unwrap()
            .action,
        TransitionAction::ReportWalPosition
    );
    assert_eq!(
        find_transition(NodeState::ReportLsn, NodeState::FastForward)
            .unwrap()
            .action,
        TransitionAction::FastForwardWal
    );
    assert_eq!(
        find_transition(NodeState::FastForward, NodeState::Secondary)
            .unwrap()
            .action,
        TransitionAction::FollowNewPrimary
    );
}

#[test]
fn test_dropped_matches_from_any_state() {
    for from in [
        NodeState::Init,
        NodeState::Single,
        NodeState::Primary,
        NodeState::Secondary,
        NodeState::Maintenance,
        NodeState::Demoted,
    ] {
        let rule = find_transition(from, NodeState::Dropped).unwrap();
        assert_eq!(rule.action, TransitionAction::DropNode);
    }
}

#[test]
fn test_exact_rules_win_over_wildcards() {
    // Primary -> Demoted has its own row; the wildcard only covers DROPPED.
    let rule = find_transition(NodeState::Primary, NodeState::Demoted).unwrap();
    assert_eq!(rule.from, NodeState::Primary);
}

#[test]
fn test_unreachable_goal_has_no_rule() {
    assert!(find_transition(NodeState::Single, NodeState::Secondary).is_none());
    assert!(find_transition(NodeState::Demoted, NodeState::Primary).is_none());
}
