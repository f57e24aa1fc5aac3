// src/core/fsm/policy.rs

//! Pure decision logic for the two safety policies a primary applies:
//! self-demotion on a suspected network partition, and the grace period a
//! failing primary gets before its restart troubles are escalated to the
//! monitor.
//!
//! Everything here takes wall-clock seconds as plain numbers so the policies
//! can be tested without a clock.

use std::time::Duration;

use super::state::NodeState;

/// What a primary that lost the monitor should do, given its local evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionVerdict {
    /// A replica is still streaming from us: refresh `last_secondary_contact`
    /// and stay primary.
    StandbyStillConnected,
    /// Stay primary; the partition evidence is not conclusive yet.
    RemainPrimary,
    /// Both the monitor and every standby have been silent for longer than
    /// the partition timeout: step down before the other side promotes.
    Demote,
}

/// Decides whether a primary that cannot reach the monitor must self-demote.
///
/// Both contact timestamps must be nonzero: a zero `last_secondary_contact`
/// means this primary has never had a standby, and such a node never
/// self-demotes. A partition timeout of zero disables self-demotion entirely.
pub fn partition_verdict(
    now_secs: u64,
    last_monitor_contact: u64,
    last_secondary_contact: u64,
    partition_timeout: Duration,
    replica_connected: bool,
) -> PartitionVerdict {
    if replica_connected {
        return PartitionVerdict::StandbyStillConnected;
    }

    let timeout = partition_timeout.as_secs();
    if timeout == 0 || last_monitor_contact == 0 || last_secondary_contact == 0 {
        return PartitionVerdict::RemainPrimary;
    }

    let monitor_silence = now_secs.saturating_sub(last_monitor_contact);
    let secondary_silence = now_secs.saturating_sub(last_secondary_contact);

    if monitor_silence > timeout && secondary_silence > timeout {
        PartitionVerdict::Demote
    } else {
        PartitionVerdict::RemainPrimary
    }
}

/// Bookkeeping for start failures of the local database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartRetryState {
    /// Unix seconds of the first failure of the current streak; 0 = none.
    pub first_failure_at: u64,
    /// Consecutive failed start attempts.
    pub attempts: u32,
}

impl StartRetryState {
    pub fn record_failure(&mut self, now_secs: u64) {
        if self.first_failure_at == 0 {
            self.first_failure_at = now_secs;
        }
        self.attempts += 1;
    }

    pub fn reset(&mut self) {
        *self = StartRetryState::default();
    }

    pub fn budget_exhausted(&self, now_secs: u64, timeout: Duration, max_retries: u32) -> bool {
        if self.first_failure_at == 0 {
            return false;
        }
        now_secs.saturating_sub(self.first_failure_at) > timeout.as_secs()
            || self.attempts >= max_retries
    }
}

/// Computes the `db_is_running` value reported to the monitor.
///
/// A primary whose database just failed to start is still reported as running
/// for a grace period, so the monitor does not fail over while a local
/// restart can still fix things.
pub fn report_db_running(
    role: NodeState,
    actually_running: bool,
    retry: &StartRetryState,
    now_secs: u64,
    restart_failure_timeout: Duration,
    restart_failure_max_retries: u32,
) -> bool {
    if role != NodeState::Primary {
        return actually_running;
    }
    if actually_running {
        return true;
    }
    // Down and never seen failing: report running once, the restart
    // accounting starts this tick.
    if retry.first_failure_at == 0 {
        return true;
    }
    !retry.budget_exhausted(now_secs, restart_failure_timeout, restart_failure_max_retries)
}
