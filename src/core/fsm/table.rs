// src/core/fsm/table.rs

//! The transition table of the local FSM.
//!
//! Transition *selection* lives here and is pure: given the persisted current
//! role and the role the monitor assigned, it names the action to perform.
//! Executing the action (promote, demote, base backup, ...) is the keeper's
//! job; on success the control loop advances `current_role` and persists it
//! before the monitor hears of the new state.

use super::state::NodeState;

/// The concrete operation a transition performs on the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Start the local database as a standalone primary.
    BootstrapAsSingle,
    /// Open access for standbys and enable replication on a primary-to-be.
    PrepareAsPrimary,
    /// Nothing left to do locally; the assigned role is confirmed as reached.
    Confirm,
    /// Drop synchronous replication requirements while a standby is away.
    DisableSyncReplication,
    /// Revert to standalone operation after the last standby left the group.
    ContinueAsSingle,
    /// Recompute and apply the replication settings the monitor decided.
    ApplyReplicationSettings,
    /// Prepare a fresh node to become a standby.
    InitAsStandby,
    /// Clone the current primary with a base backup and start following it.
    BaseBackupAndFollow,
    /// Reconfigure the replication source and resume catching up.
    ResumeCatchingUp,
    /// Get ready to be promoted: make sure the database is up and synced.
    PreparePromotion,
    /// Stop streaming from the old primary before taking over.
    StopReplicationStage,
    /// Promote the local standby out of recovery.
    PromoteStandby,
    /// Stop the local database; some other node is being promoted.
    StopDatabase,
    /// Verify the database is down and acknowledge the demotion.
    ConfirmStopped,
    /// Rewrite the standby configuration and rejoin the group as a standby.
    RejoinAsStandby,
    /// Stop streaming and report the exact replay position to the monitor.
    ReportWalPosition,
    /// Fetch the missing WAL from the most advanced standby.
    FastForwardWal,
    /// Follow the newly promoted primary.
    FollowNewPrimary,
    /// Hold position until the monitor lets this node enter maintenance.
    WaitBeforeMaintenance,
    /// Stop participating in failover decisions for the maintenance window.
    EnterMaintenance,
    /// Step down so a standby can take over before maintenance starts.
    DemoteForMaintenance,
    /// The monitor dropped this node: stop the database and wind down.
    DropNode,
}

/// One row of the transition table. `ANY_STATE` in `from` matches every
/// current role; exact rows take precedence over wildcard rows.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: NodeState,
    pub to: NodeState,
    pub action: TransitionAction,
    pub comment: &'static str,
}

use NodeState::*;
use TransitionAction::*;

pub static TRANSITION_TABLE: &[TransitionRule] = &[
    TransitionRule {
        from: Init,
        to: Single,
        action: BootstrapAsSingle,
        comment: "start as a standalone primary",
    },
    TransitionRule {
        from: Init,
        to: WaitStandby,
        action: InitAsStandby,
        comment: "prepare to join the group as a standby",
    },
    TransitionRule {
        from: Single,
        to: WaitPrimary,
        action: PrepareAsPrimary,
        comment: "a standby is joining, open replication access",
    },
    TransitionRule {
        from: WaitPrimary,
        to: Primary,
        action: Confirm,
        comment: "standby caught up, primary confirmed",
    },
    TransitionRule {
        from: Primary,
        to: WaitPrimary,
        action: DisableSyncReplication,
        comment: "standby lost, stop requiring synchronous replication",
    },
    TransitionRule {
        from: WaitPrimary,
        to: Single,
        action: ContinueAsSingle,
        comment: "last standby left the group",
    },
    TransitionRule {
        from: Primary,
        to: Single,
        action: ContinueAsSingle,
        comment: "last standby left the group",
    },
    TransitionRule {
        from: Primary,
        to: ApplySettings,
        action: ApplyReplicationSettings,
        comment: "replication settings changed on the monitor",
    },
    TransitionRule {
        from: WaitPrimary,
        to: ApplySettings,
        action: ApplyReplicationSettings,
        comment: "replication settings changed on the monitor",
    },
    TransitionRule {
        from: ApplySettings,
        to: Primary,
        action: Confirm,
        comment: "settings applied, resume as primary",
    },
    TransitionRule {
        from: WaitStandby,
        to: CatchingUp,
        action: BaseBackupAndFollow,
        comment: "clone the primary and start streaming",
    },
    TransitionRule {
        from: CatchingUp,
        to: Secondary,
        action: Confirm,
        comment: "caught up with the primary",
    },
    TransitionRule {
        from: Secondary,
        to: CatchingUp,
        action: ResumeCatchingUp,
        comment: "fell behind, catch up again",
    },
    TransitionRule {
        from: Secondary,
        to: PrepPromotion,
        action: PreparePromotion,
        comment: "selected as failover candidate",
    },
    TransitionRule {
        from: FastForward,
        to: PrepPromotion,
        action: PreparePromotion,
        comment: "selected as failover candidate after fast-forward",
    },
    TransitionRule {
        from: PrepPromotion,
        to: StopReplication,
        action: StopReplicationStage,
        comment: "stop streaming from the old primary",
    },
    TransitionRule {
        from: PrepPromotion,
        to: WaitPrimary,
        action: PromoteStandby,
        comment: "promote out of recovery",
    },
    TransitionRule {
        from: StopReplication,
        to: WaitPrimary,
        action: PromoteStandby,
        comment: "promote out of recovery",
    },
    TransitionRule {
        from: Primary,
        to: Draining,
        action: StopDatabase,
        comment: "clients are being drained before demotion",
    },
    TransitionRule {
        from: Primary,
        to: DemoteTimeout,
        action: StopDatabase,
        comment: "demoted by the monitor or by partition timeout",
    },
    TransitionRule {
        from: Primary,
        to: Demoted,
        action: StopDatabase,
        comment: "demoted by the monitor",
    },
    TransitionRule {
        from: WaitPrimary,
        to: Demoted,
        action: StopDatabase,
        comment: "demoted before any standby caught up",
    },
    TransitionRule {
        from: Draining,
        to: Demoted,
        action: ConfirmStopped,
        comment: "drain finished, demotion acknowledged",
    },
    TransitionRule {
        from: DemoteTimeout,
        to: Demoted,
        action: ConfirmStopped,
        comment: "demotion acknowledged",
    },
    TransitionRule {
        from: Demoted,
        to: CatchingUp,
        action: RejoinAsStandby,
        comment: "rejoin the group behind the new primary",
    },
    TransitionRule {
        from: Secondary,
        to: ReportLsn,
        action: ReportWalPosition,
        comment: "failover: report the replay position",
    },
    TransitionRule {
        from: CatchingUp,
        to: ReportLsn,
        action: ReportWalPosition,
        comment: "failover: report the replay position",
    },
    TransitionRule {
        from: ReportLsn,
        to: FastForward,
        action: FastForwardWal,
        comment: "fetch missing WAL from the most advanced standby",
    },
    TransitionRule {
        from: ReportLsn,
        to: Secondary,
        action: FollowNewPrimary,
        comment: "another candidate won, follow it",
    },
    TransitionRule {
        from: ReportLsn,
        to: CatchingUp,
        action: FollowNewPrimary,
        comment: "another candidate won, catch up with it",
    },
    TransitionRule {
        from: FastForward,
        to: Secondary,
        action: FollowNewPrimary,
        comment: "fast-forward done, follow the new primary",
    },
    TransitionRule {
        from: Secondary,
        to: WaitMaintenance,
        action: WaitBeforeMaintenance,
        comment: "maintenance requested, wait for the monitor",
    },
    TransitionRule {
        from: CatchingUp,
        to: WaitMaintenance,
        action: WaitBeforeMaintenance,
        comment: "maintenance requested, wait for the monitor",
    },
    TransitionRule {
        from: WaitMaintenance,
        to: Maintenance,
        action: EnterMaintenance,
        comment: "maintenance window open",
    },
    TransitionRule {
        from: Primary,
        to: PrepareMaintenance,
        action: DemoteForMaintenance,
        comment: "fail over to a standby before maintenance",
    },
    TransitionRule {
        from: PrepareMaintenance,
        to: Maintenance,
        action: EnterMaintenance,
        comment: "maintenance window open",
    },
    TransitionRule {
        from: Maintenance,
        to: CatchingUp,
        action: RejoinAsStandby,
        comment: "maintenance over, rejoin the group",
    },
    TransitionRule {
        from: AnyState,
        to: Dropped,
        action: DropNode,
        comment: "removed from the formation",
    },
];

/// Finds the transition rule for `(current, assigned)`. Exact matches win
/// over `ANY_STATE` wildcard rows. Returns `None` when the FSM has no path,
/// in which case the keeper keeps its current role and reports it unchanged.
pub fn find_transition(current: NodeState, assigned: NodeState) -> Option<&'static TransitionRule> {
    TRANSITION_TABLE
        .iter()
        .find(|rule| rule.from == current && rule.to == assigned)
        .or_else(|| {
            TRANSITION_TABLE
                .iter()
                .find(|rule| rule.from == NodeState::AnyState && rule.to == assigned)
        })
}
