use std::str::FromStr;

use palisade::core::db::{Lsn, ReplicationSlot, ServerVersion};
use palisade::core::monitor::NodeAddress;
use palisade::core::resources::slots::{
    SlotMode, is_managed_slot, plan_slot_maintenance, slot_name,
};

fn peer(node_id: i64, lsn: &str) -> NodeAddress {
    NodeAddress {
        node_id,
        name: format!("node_{node_id}"),
        host: format!("10.0.0.{node_id}"),
        port: 5432,
        lsn: Lsn::from_str(lsn).unwrap(),
        is_primary: false,
    }
}

fn slot(node_id: i64, restart_lsn: &str) -> ReplicationSlot {
    ReplicationSlot {
        name: slot_name(node_id),
        restart_lsn: Lsn::from_str(restart_lsn).unwrap(),
    }
}

#[test]
fn test_slot_names_embed_the_node_id() {
    assert_eq!(slot_name(7), "palisade_node_7");
    assert!(is_managed_slot("palisade_node_7"));
    assert!(is_managed_slot("palisade_node_12"));
    assert!(!is_managed_slot("palisade_node_"));
    assert!(!is_managed_slot("palisade_node_x"));
    assert!(!is_managed_slot("someone_elses_slot"));
}

#[test]
fn test_same_peer_set_plans_nothing() {
    let existing = vec![slot(2, "0/1000"), slot(3, "0/1000")];
    let peers = vec![peer(2, "0/1000"), peer(3, "0/1000")];
    let plan = plan_slot_maintenance(&existing, &peers, SlotMode::Full);
    assert!(plan.is_empty(), "unexpected plan: {plan:?}");
}

#[test]
fn test_new_peer_gets_a_slot() {
    let existing = vec![slot(2, "0/1000")];
    let peers = vec![peer(2, "0/1000"), peer(3, "0/2000")];
    let plan = plan_slot_maintenance(&existing, &peers, SlotMode::Full);
    assert_eq!(plan.create, vec![slot_name(3)]);
    assert!(plan.drop.is_empty());
}

#[test]
fn test_departed_peer_slot_is_dropped() {
    let existing = vec![slot(2, "0/1000"), slot(3, "0/1000")];
    let peers = vec![peer(3, "0/1000")];
    let plan = plan_slot_maintenance(&existing, &peers, SlotMode::Full);
    assert_eq!(plan.drop, vec![slot_name(2)]);
    assert!(plan.create.is_empty());
    assert!(plan.advance.is_empty());
}

#[test]
fn test_unmanaged_slots_are_never_dropped() {
    let existing = vec![
        ReplicationSlot {
            name: "operator_backup_slot".to_string(),
            restart_lsn: Lsn::ZERO,
        },
        slot(2, "0/1000"),
    ];
    let plan = plan_slot_maintenance(&existing, &[], SlotMode::Full);
    assert_eq!(plan.drop, vec![slot_name(2)]);
}

#[test]
fn test_slot_advances_to_a_peer_ahead_of_it() {
    let existing = vec![slot(2, "0/1000")];
    let peers = vec![peer(2, "0/2000")];
    let plan = plan_slot_maintenance(&existing, &peers, SlotMode::Full);
    assert_eq!(plan.advance, vec![(slot_name(2), Lsn::from_str("0/2000").unwrap())]);
}

#[test]
fn test_no_advance_for_a_peer_behind_the_slot() {
    let existing = vec![slot(2, "0/2000")];
    let peers = vec![peer(2, "0/1000")];
    let plan = plan_slot_maintenance(&existing, &peers, SlotMode::Full);
    assert!(plan.advance.is_empty());
}

#[test]
fn test_no_advance_for_an_unknown_position() {
    let existing = vec![slot(2, "0/1000")];
    let peers = vec![peer(2, "0/0")];
    let plan = plan_slot_maintenance(&existing, &peers, SlotMode::Full);
    assert!(plan.advance.is_empty());
}

#[test]
fn test_primary_mode_never_advances() {
    let existing = vec![slot(2, "0/1000")];
    let peers = vec![peer(2, "AB/CD002000")];
    let plan = plan_slot_maintenance(&existing, &peers, SlotMode::CreateDropOnly);
    assert!(plan.advance.is_empty());
}

#[test]
fn test_slot_advance_version_gate() {
    let cases = [
        (ServerVersion { major: 10, minor: 23 }, false),
        (ServerVersion { major: 11, minor: 0 }, false),
        (ServerVersion { major: 11, minor: 8 }, false),
        (ServerVersion { major: 11, minor: 9 }, true),
        (ServerVersion { major: 12, minor: 3 }, false),
        (ServerVersion { major: 12, minor: 4 }, true),
        (ServerVersion { major: 16, minor: 0 }, true),
    ];
    for (version, expected) in cases {
        assert_eq!(
            version.supports_slot_advance(),
            expected,
            "wrong verdict for {version:?}"
        );
    }
}

#[test]
fn test_lsn_parse_and_render() {
    let lsn = Lsn::from_str("16/B374D848").unwrap();
    assert_eq!(lsn.to_string(), "16/B374D848");
    assert_eq!(lsn.0, 0x16_B374_D848);

    assert!(Lsn::from_str("0/0").unwrap().is_zero());
    assert!(Lsn::from_str("junk").is_err());
    assert!(Lsn::from_str("1/2/3").is_err());

    let (a, b) = (Lsn::from_str("0/FF").unwrap(), Lsn::from_str("1/0").unwrap());
    assert!(a < b);
}
