// src/core/fsm/state.rs

//! The keeper's node states. The textual names are part of the wire protocol
//! with the monitor and must never change; the one-byte disk codes are part of
//! the state-file layout and must never change either.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::core::errors::KeeperError;

/// One state of the keeper's finite state machine. `NO_STATE` and `ANY_STATE`
/// are sentinels used by the monitor protocol and the transition table; they
/// are never a node's actual role.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum NodeState {
    #[strum(serialize = "INIT")]
    #[serde(rename = "INIT")]
    Init,
    #[strum(serialize = "SINGLE")]
    #[serde(rename = "SINGLE")]
    Single,
    #[strum(serialize = "WAIT_PRIMARY")]
    #[serde(rename = "WAIT_PRIMARY")]
    WaitPrimary,
    #[strum(serialize = "PRIMARY")]
    #[serde(rename = "PRIMARY")]
    Primary,
    #[strum(serialize = "APPLY_SETTINGS")]
    #[serde(rename = "APPLY_SETTINGS")]
    ApplySettings,
    #[strum(serialize = "PREP_PROMOTION")]
    #[serde(rename = "PREP_PROMOTION")]
    PrepPromotion,
    #[strum(serialize = "STOP_REPLICATION")]
    #[serde(rename = "STOP_REPLICATION")]
    StopReplication,
    #[strum(serialize = "WAIT_STANDBY")]
    #[serde(rename = "WAIT_STANDBY")]
    WaitStandby,
    #[strum(serialize = "CATCHINGUP")]
    #[serde(rename = "CATCHINGUP")]
    CatchingUp,
    #[strum(serialize = "SECONDARY")]
    #[serde(rename = "SECONDARY")]
    Secondary,
    #[strum(serialize = "MAINTENANCE")]
    #[serde(rename = "MAINTENANCE")]
    Maintenance,
    #[strum(serialize = "PREPARE_MAINTENANCE")]
    #[serde(rename = "PREPARE_MAINTENANCE")]
    PrepareMaintenance,
    #[strum(serialize = "WAIT_MAINTENANCE")]
    #[serde(rename = "WAIT_MAINTENANCE")]
    WaitMaintenance,
    #[strum(serialize = "DRAINING")]
    #[serde(rename = "DRAINING")]
    Draining,
    #[strum(serialize = "DEMOTE_TIMEOUT")]
    #[serde(rename = "DEMOTE_TIMEOUT")]
    DemoteTimeout,
    #[strum(serialize = "DEMOTED")]
    #[serde(rename = "DEMOTED")]
    Demoted,
    #[strum(serialize = "REPORT_LSN")]
    #[serde(rename = "REPORT_LSN")]
    ReportLsn,
    #[strum(serialize = "FAST_FORWARD")]
    #[serde(rename = "FAST_FORWARD")]
    FastForward,
    #[strum(serialize = "DROPPED")]
    #[serde(rename = "DROPPED")]
    Dropped,
    #[strum(serialize = "NO_STATE")]
    #[serde(rename = "NO_STATE")]
    NoState,
    #[strum(serialize = "ANY_STATE")]
    #[serde(rename = "ANY_STATE")]
    AnyState,
}

impl NodeState {
    /// The state a node starts in before the monitor assigns anything.
    pub fn is_initial(self) -> bool {
        self == NodeState::Init
    }

    /// `DROPPED` is terminal: the keeper winds down once it is reached.
    pub fn is_terminal(self) -> bool {
        self == NodeState::Dropped
    }

    /// States in which the local database must be kept down. Starting it
    /// while another node is being promoted would reopen the split-brain
    /// window these states exist to close.
    pub fn implies_database_down(self) -> bool {
        matches!(
            self,
            NodeState::Draining | NodeState::DemoteTimeout | NodeState::Demoted
        )
    }

    /// States in which the node follows a primary and keeps its standby
    /// source configuration up to date.
    pub fn is_standby_like(self) -> bool {
        matches!(
            self,
            NodeState::CatchingUp | NodeState::Secondary | NodeState::Maintenance
        )
    }

    /// The stable one-byte code stored in the state file for this state.
    pub fn disk_code(self) -> u8 {
        match self {
            NodeState::Init => 0,
            NodeState::Single => 1,
            NodeState::WaitPrimary => 2,
            NodeState::Primary => 3,
            NodeState::ApplySettings => 4,
            NodeState::PrepPromotion => 5,
            NodeState::StopReplication => 6,
            NodeState::WaitStandby => 7,
            NodeState::CatchingUp => 8,
            NodeState::Secondary => 9,
            NodeState::Maintenance => 10,
            NodeState::PrepareMaintenance => 11,
            NodeState::WaitMaintenance => 12,
            NodeState::Draining => 13,
            NodeState::DemoteTimeout => 14,
            NodeState::Demoted => 15,
            NodeState::ReportLsn => 16,
            NodeState::FastForward => 17,
            NodeState::Dropped => 18,
            NodeState::NoState => 254,
            NodeState::AnyState => 255,
        }
    }

    /// Decodes a state-file code written by `disk_code`.
    pub fn from_disk_code(code: u8) -> Result<Self, KeeperError> {
        let state = match code {
            0 => NodeState::Init,
            1 => NodeState::Single,
            2 => NodeState::WaitPrimary,
            3 => NodeState::Primary,
            4 => NodeState::ApplySettings,
            5 => NodeState::PrepPromotion,
            6 => NodeState::StopReplication,
            7 => NodeState::WaitStandby,
            8 => NodeState::CatchingUp,
            9 => NodeState::Secondary,
            10 => NodeState::Maintenance,
            11 => NodeState::PrepareMaintenance,
            12 => NodeState::WaitMaintenance,
            13 => NodeState::Draining,
            14 => NodeState::DemoteTimeout,
            15 => NodeState::Demoted,
            16 => NodeState::ReportLsn,
            17 => NodeState::FastForward,
            18 => NodeState::Dropped,
            254 => NodeState::NoState,
            255 => NodeState::AnyState,
            other => {
                return Err(KeeperError::StateFile(format!(
                    "unknown node state code {other} in state file"
                )));
            }
        };
        Ok(state)
    }
}
