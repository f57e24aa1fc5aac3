// src/core/keeper/state_file.rs

//! The keeper's crash-safe on-disk state.
//!
//! The layout is fixed and versioned: a four-byte magic, a version byte, the
//! two roles as one-byte disk codes, a padding byte, then the numeric fields
//! in little-endian order. The file is always written to `<path>.new` and
//! renamed into place, so readers (including operator tooling) never see a
//! torn write. A missing file simply means the node was never registered.

use std::path::Path;

use crate::core::errors::KeeperError;
use crate::core::fsm::NodeState;
use crate::core::resources::write_file_atomic;

const STATE_FILE_MAGIC: [u8; 4] = *b"PLSD";
const STATE_FILE_VERSION: u8 = 1;
const STATE_FILE_SIZE: usize = 56;

/// Everything the keeper persists between iterations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperState {
    /// Assigned once by the first successful registration, never changed.
    pub node_id: i64,
    pub group_id: i64,
    pub current_role: NodeState,
    pub assigned_role: NodeState,
    /// Unix seconds of the last successful monitor exchange; 0 = never.
    pub last_monitor_contact: u64,
    /// Unix seconds a standby was last seen connected; 0 = never.
    pub last_secondary_contact: u64,
    pub control_version: u32,
    pub catalog_version: u32,
    /// The database's system identifier; 0 until first observed, then fixed.
    pub system_identifier: u64,
}

impl Default for KeeperState {
    fn default() -> Self {
        Self {
            node_id: 0,
            group_id: 0,
            current_role: NodeState::Init,
            assigned_role: NodeState::Init,
            last_monitor_contact: 0,
            last_secondary_contact: 0,
            control_version: 0,
            catalog_version: 0,
            system_identifier: 0,
        }
    }
}

impl KeeperState {
    /// Serializes into the fixed on-disk layout.
    pub fn encode(&self) -> [u8; STATE_FILE_SIZE] {
        let mut buf = [0u8; STATE_FILE_SIZE];
        buf[0..4].copy_from_slice(&STATE_FILE_MAGIC);
        buf[4] = STATE_FILE_VERSION;
        buf[5] = self.current_role.disk_code();
        buf[6] = self.assigned_role.disk_code();
        buf[7] = 0;
        buf[8..16].copy_from_slice(&self.node_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.group_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.last_monitor_contact.to_le_bytes());
        buf[32..40].copy_from_slice(&self.last_secondary_contact.to_le_bytes());
        buf[40..44].copy_from_slice(&self.control_version.to_le_bytes());
        buf[44..48].copy_from_slice(&self.catalog_version.to_le_bytes());
        buf[48..56].copy_from_slice(&self.system_identifier.to_le_bytes());
        buf
    }

    /// Deserializes the fixed layout, validating magic and version.
    pub fn decode(buf: &[u8]) -> Result<Self, KeeperError> {
        if buf.len() != STATE_FILE_SIZE {
            return Err(KeeperError::StateFile(format!(
                "state file is {} bytes, expected {STATE_FILE_SIZE}",
                buf.len()
            )));
        }
        if buf[0..4] != STATE_FILE_MAGIC {
            return Err(KeeperError::StateFile(
                "state file magic does not match".into(),
            ));
        }
        if buf[4] != STATE_FILE_VERSION {
            return Err(KeeperError::StateFile(format!(
                "state file version {} is not supported (expected {STATE_FILE_VERSION})",
                buf[4]
            )));
        }
        let le_u64 = |at: usize| u64::from_le_bytes(buf[at..at + 8].try_into().unwrap());
        let le_i64 = |at: usize| i64::from_le_bytes(buf[at..at + 8].try_into().unwrap());
        let le_u32 = |at: usize| u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        Ok(Self {
            current_role: NodeState::from_disk_code(buf[5])?,
            assigned_role: NodeState::from_disk_code(buf[6])?,
            node_id: le_i64(8),
            group_id: le_i64(16),
            last_monitor_contact: le_u64(24),
            last_secondary_contact: le_u64(32),
            control_version: le_u32(40),
            catalog_version: le_u32(44),
            system_identifier: le_u64(48),
        })
    }
}

/// Reads the state file; `None` on first boot.
pub async fn load(path: &Path) -> Result<Option<KeeperState>, KeeperError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(KeeperState::decode(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persists the state durably: temp file, fsync, atomic rename.
pub async fn store(path: &Path, state: &KeeperState) -> Result<(), KeeperError> {
    write_file_atomic(path, &state.encode()).await
}

/// Unlinks the state file, tolerating its absence.
pub async fn remove(path: &Path) -> Result<(), KeeperError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
