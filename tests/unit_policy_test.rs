use std::time::Duration;

use palisade::core::fsm::{
    NodeState, PartitionVerdict, StartRetryState, partition_verdict, report_db_running,
};

const T: Duration = Duration::from_secs(30);

#[test]
fn test_demotes_when_both_contacts_are_stale() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, now - 35, now - 35, T, false);
    assert_eq!(verdict, PartitionVerdict::Demote);
}

#[test]
fn test_stays_primary_when_monitor_recently_seen() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, now - 10, now - 35, T, false);
    assert_eq!(verdict, PartitionVerdict::RemainPrimary);
}

#[test]
fn test_stays_primary_when_standby_recently_seen() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, now - 35, now - 10, T, false);
    assert_eq!(verdict, PartitionVerdict::RemainPrimary);
}

#[test]
fn test_connected_replica_overrides_everything() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, now - 500, now - 500, T, true);
    assert_eq!(verdict, PartitionVerdict::StandbyStillConnected);
}

#[test]
fn test_primary_that_never_had_a_standby_never_demotes() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, now - 500, 0, T, false);
    assert_eq!(verdict, PartitionVerdict::RemainPrimary);
}

#[test]
fn test_never_contacted_monitor_never_demotes() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, 0, now - 500, T, false);
    assert_eq!(verdict, PartitionVerdict::RemainPrimary);
}

#[test]
fn test_zero_timeout_disables_self_demotion() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, now - 5000, now - 5000, Duration::ZERO, false);
    assert_eq!(verdict, PartitionVerdict::RemainPrimary);
}

#[test]
fn test_silence_exactly_at_timeout_is_not_a_partition() {
    let now = 1_000_000;
    let verdict = partition_verdict(now, now - 30, now - 30, T, false);
    assert_eq!(verdict, PartitionVerdict::RemainPrimary);
}

// --- reporting grace for a failing primary ---

const GRACE: Duration = Duration::from_secs(20);
const MAX_RETRIES: u32 = 3;

fn report(role: NodeState, running: bool, retry: &StartRetryState, now: u64) -> bool {
    report_db_running(role, running, retry, now, GRACE, MAX_RETRIES)
}

#[test]
fn test_non_primary_reports_the_truth() {
    let retry = StartRetryState::default();
    assert!(!report(NodeState::Secondary, false, &retry, 100));
    assert!(report(NodeState::Secondary, true, &retry, 100));
}

#[test]
fn test_running_primary_reports_true() {
    let retry = StartRetryState::default();
    assert!(report(NodeState::Primary, true, &retry, 100));
}

#[test]
fn test_primary_down_without_failure_history_reports_true() {
    let retry = StartRetryState::default();
    assert!(report(NodeState::Primary, false, &retry, 100));
}

#[test]
fn test_primary_down_within_budget_reports_true() {
    let mut retry = StartRetryState::default();
    retry.record_failure(100);
    retry.record_failure(105);
    assert!(report(NodeState::Primary, false, &retry, 110));
}

#[test]
fn test_primary_down_past_timeout_reports_false() {
    let mut retry = StartRetryState::default();
    retry.record_failure(100);
    assert!(!report(NodeState::Primary, false, &retry, 121));
}

#[test]
fn test_primary_down_at_timeout_boundary_still_reports_true() {
    let mut retry = StartRetryState::default();
    retry.record_failure(100);
    assert!(report(NodeState::Primary, false, &retry, 120));
}

#[test]
fn test_primary_down_after_max_retries_reports_false() {
    let mut retry = StartRetryState::default();
    retry.record_failure(100);
    retry.record_failure(101);
    retry.record_failure(102);
    assert!(!report(NodeState::Primary, false, &retry, 103));
}

#[test]
fn test_successful_start_resets_the_budget() {
    let mut retry = StartRetryState::default();
    retry.record_failure(100);
    retry.record_failure(101);
    retry.reset();
    assert!(report(NodeState::Primary, false, &retry, 500));
    assert_eq!(retry, StartRetryState::default());
}
