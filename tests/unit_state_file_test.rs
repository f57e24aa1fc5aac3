use palisade::core::fsm::NodeState;
use palisade::core::keeper::state_file::{self, KeeperState};

fn sample_state() -> KeeperState {
    KeeperState {
        node_id: 4,
        group_id: 1,
        current_role: NodeState::Secondary,
        assigned_role: NodeState::PrepPromotion,
        last_monitor_contact: 1_722_500_000,
        last_secondary_contact: 1_722_499_000,
        control_version: 1300,
        catalog_version: 202_307_071,
        system_identifier: 7_210_112_988_621_973_172,
    }
}

#[test]
fn test_encode_decode_round_trip() {
    let state = sample_state();
    let decoded = KeeperState::decode(&state.encode()).unwrap();
    assert_eq!(decoded, state);
}

#[test]
fn test_decode_rejects_bad_magic() {
    let mut bytes = sample_state().encode();
    bytes[0] = b'X';
    let err = KeeperState::decode(&bytes).unwrap_err();
    assert!(err.to_string().contains("magic"));
}

#[test]
fn test_decode_rejects_unknown_version() {
    let mut bytes = sample_state().encode();
    bytes[4] = 99;
    let err = KeeperState::decode(&bytes).unwrap_err();
    assert!(err.to_string().contains("version"));
}

#[test]
fn test_decode_rejects_truncated_file() {
    let bytes = sample_state().encode();
    assert!(KeeperState::decode(&bytes[..20]).is_err());
}

#[test]
fn test_decode_rejects_unknown_role_code() {
    let mut bytes = sample_state().encode();
    bytes[5] = 77;
    assert!(KeeperState::decode(&bytes).is_err());
}

#[tokio::test]
async fn test_missing_file_reads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("palisade.state");
    assert_eq!(state_file::load(&path).await.unwrap(), None);
}

#[tokio::test]
async fn test_store_then_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("palisade.state");
    let state = sample_state();

    state_file::store(&path, &state).await.unwrap();
    let loaded = state_file::load(&path).await.unwrap().unwrap();
    assert_eq!(loaded, state);
}

#[tokio::test]
async fn test_store_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("palisade.state");
    state_file::store(&path, &sample_state()).await.unwrap();

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".new");
    assert!(!std::path::Path::new(&temp_path).exists());
}

#[tokio::test]
async fn test_store_overwrites_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("palisade.state");

    let mut state = sample_state();
    state_file::store(&path, &state).await.unwrap();

    state.current_role = NodeState::PrepPromotion;
    state.assigned_role = NodeState::StopReplication;
    state_file::store(&path, &state).await.unwrap();

    let loaded = state_file::load(&path).await.unwrap().unwrap();
    assert_eq!(loaded.current_role, NodeState::PrepPromotion);
    assert_eq!(loaded.assigned_role, NodeState::StopReplication);
}

#[tokio::test]
async fn test_store_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/dir/palisade.state");
    state_file::store(&path, &sample_state()).await.unwrap();
    assert!(state_file::load(&path).await.unwrap().is_some());
}

#[tokio::test]
async fn test_remove_tolerates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("palisade.state");
    state_file::remove(&path).await.unwrap();

    state_file::store(&path, &sample_state()).await.unwrap();
    state_file::remove(&path).await.unwrap();
    assert_eq!(state_file::load(&path).await.unwrap(), None);
}
