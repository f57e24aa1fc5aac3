use palisade::core::db::Lsn;
use palisade::core::monitor::NodeAddress;
use palisade::core::resources::hba::{diff_peers, ensure_rules, rules_for_peer};

fn peer(node_id: i64, host: &str) -> NodeAddress {
    NodeAddress {
        node_id,
        name: format!("node_{node_id}"),
        host: host.to_string(),
        port: 5432,
        lsn: Lsn::ZERO,
        is_primary: false,
    }
}

#[test]
fn test_diff_of_identical_sets_is_empty() {
    let peers = vec![peer(2, "10.0.0.2"), peer(3, "10.0.0.3")];
    assert!(diff_peers(&peers, &peers).is_empty());
}

#[test]
fn test_diff_reports_new_peers() {
    let old = vec![peer(2, "10.0.0.2")];
    let new = vec![peer(2, "10.0.0.2"), peer(3, "10.0.0.3")];
    let changed = diff_peers(&old, &new);
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].node_id, 3);
}

#[test]
fn test_diff_reports_changed_hostnames() {
    let old = vec![peer(2, "10.0.0.2"), peer(3, "10.0.0.3")];
    let new = vec![peer(2, "10.0.9.9"), peer(3, "10.0.0.3")];
    let changed = diff_peers(&old, &new);
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].node_id, 2);
    assert_eq!(changed[0].host, "10.0.9.9");
}

#[test]
fn test_diff_ignores_removed_peers() {
    let old = vec![peer(2, "10.0.0.2"), peer(3, "10.0.0.3")];
    let new = vec![peer(3, "10.0.0.3")];
    assert!(diff_peers(&old, &new).is_empty());
}

#[test]
fn test_diff_does_not_depend_on_input_order() {
    let old = vec![peer(3, "10.0.0.3"), peer(2, "10.0.0.2")];
    let new = vec![peer(2, "10.0.0.2"), peer(4, "10.0.0.4"), peer(3, "10.0.0.3")];
    let changed = diff_peers(&old, &new);
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].node_id, 4);
}

#[test]
fn test_ipv4_literal_gets_both_address_families() {
    let rules = rules_for_peer("10.0.0.2", "appdb", "replicator", "scram-sha-256");
    let rendered: Vec<String> = rules.iter().map(|r| r.render()).collect();
    assert!(rendered.contains(&"host appdb all 10.0.0.2/32 scram-sha-256".to_string()));
    assert!(rendered.contains(&"host appdb all ::ffff:10.0.0.2/128 scram-sha-256".to_string()));
    assert!(
        rendered.contains(&"host replication replicator 10.0.0.2/32 scram-sha-256".to_string())
    );
    assert!(
        rendered
            .contains(&"host replication replicator ::ffff:10.0.0.2/128 scram-sha-256".to_string())
    );
}

#[test]
fn test_ipv6_literal_gets_a_single_cidr() {
    let rules = rules_for_peer("2001:db8::7", "appdb", "replicator", "trust");
    let rendered: Vec<String> = rules.iter().map(|r| r.render()).collect();
    assert_eq!(
        rendered,
        vec![
            "host appdb all 2001:db8::7/128 trust".to_string(),
            "host replication replicator 2001:db8::7/128 trust".to_string(),
        ]
    );
}

#[test]
fn test_hostname_is_matched_as_written() {
    let rules = rules_for_peer("standby.example.com", "appdb", "replicator", "trust");
    let rendered: Vec<String> = rules.iter().map(|r| r.render()).collect();
    assert_eq!(
        rendered,
        vec![
            "host appdb all standby.example.com trust".to_string(),
            "host replication replicator standby.example.com trust".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_ensure_rules_appends_only_missing_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hba.conf");
    let peers = vec![peer(2, "10.0.0.2")];

    let changed = ensure_rules(&path, &peers, "appdb", "replicator", "trust")
        .await
        .unwrap();
    assert!(changed);
    let first = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(first.lines().count(), 4);

    // A second run with the same peers finds every line present.
    let changed = ensure_rules(&path, &peers, "appdb", "replicator", "trust")
        .await
        .unwrap();
    assert!(!changed);
    let second = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_ensure_rules_preserves_operator_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hba.conf");
    tokio::fs::write(&path, "host all postgres 127.0.0.1/32 trust\n")
        .await
        .unwrap();

    let peers = vec![peer(3, "10.0.0.3")];
    ensure_rules(&path, &peers, "appdb", "replicator", "trust")
        .await
        .unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(contents.starts_with("host all postgres 127.0.0.1/32 trust\n"));
    assert!(contents.contains("host replication replicator 10.0.0.3/32 trust"));
}

#[tokio::test]
async fn test_ensure_rules_with_no_changed_peers_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hba.conf");
    let changed = ensure_rules(&path, &[], "appdb", "replicator", "trust")
        .await
        .unwrap();
    assert!(!changed);
    assert!(!path.exists());
}
