// src/core/exit.rs

//! Process exit codes shared between the keeper service and its supervisor.
//!
//! The supervisor restarts permanent children on any exit, but
//! `EXIT_MONITOR_INCOMPATIBLE` additionally re-resolves the executable path
//! before respawning, so that an upgraded binary installed on disk takes over.

pub const EXIT_OK: i32 = 0;
pub const EXIT_INTERNAL_ERROR: i32 = 1;
pub const EXIT_BAD_CONFIG: i32 = 2;
pub const EXIT_BAD_DB_SETUP: i32 = 3;
pub const EXIT_MONITOR_INCOMPATIBLE: i32 = 4;

use crate::core::errors::KeeperError;

/// Maps a terminal keeper error to the exit code the supervisor understands.
pub fn code_for(err: &KeeperError) -> i32 {
    match err {
        KeeperError::Config(_) => EXIT_BAD_CONFIG,
        KeeperError::ExtensionMismatch { .. } => EXIT_MONITOR_INCOMPATIBLE,
        KeeperError::IdentityMismatch { .. }
        | KeeperError::PortChanged { .. }
        | KeeperError::NodeIdChanged { .. }
        | KeeperError::Registration(_)
        | KeeperError::PidFile(_) => EXIT_BAD_DB_SETUP,
        _ => EXIT_INTERNAL_ERROR,
    }
}
