// src/core/keeper/facts.rs

//! Identity checks run against the per-tick facts. A changed system
//! identifier or a database answering on the wrong port means this keeper is
//! looking at a different database than the one it registered; carrying on
//! would corrupt the group.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::db::{ControlData, DbFacts};
use crate::core::errors::KeeperError;
use crate::core::keeper::state_file::KeeperState;

/// Wall-clock seconds since the epoch, as stored in the state file.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Verifies the cached system identifier against the database's control
/// data. A zero cache is uninitialized and accepts anything.
pub fn verify_identity(state: &KeeperState, control: &ControlData) -> Result<(), KeeperError> {
    if state.system_identifier != 0
        && control.system_identifier != 0
        && state.system_identifier != control.system_identifier
    {
        return Err(KeeperError::IdentityMismatch {
            cached: state.system_identifier,
            reported: control.system_identifier,
        });
    }
    Ok(())
}

/// Verifies the database answers on the configured port.
pub fn verify_port(configured: u16, facts: &DbFacts) -> Result<(), KeeperError> {
    if let Some(reported) = facts.port
        && reported != configured
    {
        return Err(KeeperError::PortChanged {
            configured,
            reported,
        });
    }
    Ok(())
}

/// Caches identity fields the first time the database reports them. Returns
/// whether the system identifier was newly learned, in which case the monitor
/// needs to hear about it.
pub fn refresh_identity(state: &mut KeeperState, control: &ControlData) -> bool {
    state.control_version = control.control_version;
    state.catalog_version = control.catalog_version;
    if state.system_identifier == 0 && control.system_identifier != 0 {
        state.system_identifier = control.system_identifier;
        return true;
    }
    false
}
