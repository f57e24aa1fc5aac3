// src/core/db/mod.rs

//! Types and the trait boundary for the local database, which is owned by a
//! separate controller subprocess. The keeper only ever talks to the database
//! through this interface: lifecycle requests go to the controller, queries
//! are proxied by it.

pub mod conninfo;
pub mod controller;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::KeeperError;

pub use conninfo::ConnInfo;
pub use controller::ControllerClient;

/// A log sequence number: a 64-bit position in the write-ahead log, rendered
/// as two slash-separated hex halves. `0/0` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| KeeperError::Protocol(format!("bad LSN '{s}'")))?;
        let hi = u64::from_str_radix(hi, 16)
            .map_err(|e| KeeperError::Protocol(format!("bad LSN '{s}': {e}")))?;
        let lo = u64::from_str_radix(lo, 16)
            .map_err(|e| KeeperError::Protocol(format!("bad LSN '{s}': {e}")))?;
        if hi > u32::MAX as u64 || lo > u32::MAX as u64 {
            return Err(KeeperError::Protocol(format!("LSN '{s}' out of range")));
        }
        Ok(Lsn((hi << 32) | lo))
    }
}

/// The synchronous-replication standing of the connected standby set, as the
/// local database reports it. Empty when no standby is connected.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum SyncState {
    #[default]
    #[strum(serialize = "")]
    None,
    #[strum(serialize = "async")]
    Async,
    #[strum(serialize = "potential")]
    Potential,
    #[strum(serialize = "sync")]
    Sync,
    #[strum(serialize = "quorum")]
    Quorum,
}

/// The database's immutable identity, read from its control data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlData {
    pub control_version: u32,
    pub catalog_version: u32,
    pub system_identifier: u64,
}

/// Major/minor server version, used to gate slot advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    /// Whether replication slots can be advanced on this server. Servers
    /// before major 11 lack the operation; 11.0–11.8 and 12.0–12.3 have it
    /// but corrupt the restart point when advancing past a checkpoint.
    pub fn supports_slot_advance(self) -> bool {
        match self.major {
            0..=10 => false,
            11 => self.minor >= 9,
            12 => self.minor >= 4,
            _ => true,
        }
    }
}

/// Pid and port as recorded in the database's own pid file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub port: Option<u16>,
}

/// One physical replication slot on the local database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSlot {
    pub name: String,
    pub restart_lsn: Lsn,
}

/// Replication settings the keeper reapplies when the monitor's decisions or
/// the SSL configuration change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSettings {
    pub synchronous_standby_names: String,
    pub listen_addresses: String,
    pub ssl_enabled: bool,
}

/// The local facts sampled once per control-loop tick. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct DbFacts {
    pub is_running: bool,
    pub is_in_recovery: bool,
    pub current_lsn: Lsn,
    pub sync_state: SyncState,
    pub pid: Option<u32>,
    pub port: Option<u16>,
}

/// Everything the keeper may ask of the local database, by way of the
/// controller subprocess. Implementations connect per request; `disconnect`
/// after a loop iteration is always safe.
#[async_trait]
pub trait DatabaseRuntime: Send + Sync {
    async fn status(&self) -> Result<ProcessStatus, KeeperError>;

    async fn start(&self) -> Result<(), KeeperError>;

    async fn stop(&self) -> Result<(), KeeperError>;

    async fn restart(&self) -> Result<(), KeeperError>;

    /// Reloads the server configuration without a restart.
    async fn reload(&self) -> Result<(), KeeperError>;

    async fn checkpoint(&self) -> Result<(), KeeperError>;

    /// Promotes a standby out of recovery.
    async fn promote(&self) -> Result<(), KeeperError>;

    async fn control_data(&self) -> Result<ControlData, KeeperError>;

    async fn server_version(&self) -> Result<ServerVersion, KeeperError>;

    async fn is_in_recovery(&self) -> Result<bool, KeeperError>;

    async fn current_lsn(&self) -> Result<Lsn, KeeperError>;

    async fn sync_state(&self) -> Result<SyncState, KeeperError>;

    /// Counts connected replication clients authenticated as `username`.
    /// Used by the partition policy to detect a still-attached standby.
    async fn connected_standby_count(&self, username: &str) -> Result<usize, KeeperError>;

    async fn list_replication_slots(&self) -> Result<Vec<ReplicationSlot>, KeeperError>;

    async fn create_replication_slot(&self, name: &str) -> Result<(), KeeperError>;

    async fn drop_replication_slot(&self, name: &str) -> Result<(), KeeperError>;

    async fn advance_replication_slot(&self, name: &str, to: Lsn) -> Result<(), KeeperError>;

    async fn apply_replication_settings(
        &self,
        settings: &ReplicationSettings,
    ) -> Result<(), KeeperError>;

    /// Clones `source` into the data directory, throttled to `max_rate` when
    /// given (e.g. "100M").
    async fn base_backup(
        &self,
        source: &ConnInfo,
        backup_dir: &PathBuf,
        max_rate: Option<&str>,
    ) -> Result<(), KeeperError>;

    /// Replays the WAL still available on `source` without following it.
    async fn fast_forward(&self, source: &ConnInfo) -> Result<(), KeeperError>;

    /// Drops any pooled connection to the controller.
    fn disconnect(&self);
}

/// Samples the per-tick facts, tolerating a database that is down: queries
/// then fail and the facts keep their zero values.
pub async fn sample_facts(db: &dyn DatabaseRuntime) -> DbFacts {
    let status = db.status().await.unwrap_or_default();
    let mut facts = DbFacts {
        is_running: status.running,
        pid: status.pid,
        port: status.port,
        ..DbFacts::default()
    };
    if !facts.is_running {
        return facts;
    }
    facts.is_in_recovery = db.is_in_recovery().await.unwrap_or(false);
    facts.current_lsn = db.current_lsn().await.unwrap_or(Lsn::ZERO);
    facts.sync_state = db.sync_state().await.unwrap_or_default();
    facts
}
