// src/core/monitor/mod.rs

//! The monitor side of the keeper: wire protocol, typed client, retry
//! policies, and the row/notification types exchanged with the monitor.

pub mod client;
pub mod protocol;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::db::Lsn;
use crate::core::errors::KeeperError;
use crate::core::fsm::NodeState;

pub use client::MonitorClient;
pub use retry::{RetryPolicy, RetryState};

/// The monitor extension version this keeper binary was built against. The
/// keeper refuses to run against a monitor with a different installed version
/// and exits so the supervisor can re-execute a possibly upgraded binary.
pub const MONITOR_EXTENSION_VERSION: &str = "2.1";

/// Environment override of the expected extension version, for tests only.
pub const EXTENSION_VERSION_ENV: &str = "PALISADE_EXTENSION_VERSION";

/// Upper bound on the cached peer set. The monitor rejects registrations of
/// peers beyond this cap, and the keeper never caches more than this.
pub const MAX_PEER_NODES: usize = 12;

/// How to reach the monitor, parsed from the configured URI.
/// `monitor://host:port` is plain TCP, `monitors://host:port` is TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub ca_file: Option<String>,
    pub connect_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_uri(
        uri: &Url,
        ca_file: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, KeeperError> {
        let tls = match uri.scheme() {
            "monitor" => false,
            "monitors" => true,
            other => {
                return Err(KeeperError::Config(format!(
                    "unsupported monitor URI scheme '{other}', expected monitor:// or monitors://"
                )));
            }
        };
        let host = uri
            .host_str()
            .ok_or_else(|| KeeperError::Config("monitor URI has no host".into()))?
            .to_string();
        let port = uri
            .port()
            .ok_or_else(|| KeeperError::Config("monitor URI has no port".into()))?;
        Ok(Self {
            host,
            port,
            tls,
            ca_file,
            connect_timeout,
        })
    }
}

/// The kind of node registered with the monitor.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
    Serialize,
    Deserialize,
)]
pub enum NodeKind {
    #[default]
    #[strum(serialize = "standalone")]
    #[serde(rename = "standalone")]
    Standalone,
    #[strum(serialize = "coordinator")]
    #[serde(rename = "coordinator")]
    Coordinator,
    #[strum(serialize = "worker")]
    #[serde(rename = "worker")]
    Worker,
}

/// One peer node as reported by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub node_id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub lsn: Lsn,
    pub is_primary: bool,
}

/// The monitor's reply to `register_node` and to every `node_active` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorAssignedState {
    pub node_id: i64,
    pub group_id: i64,
    pub state: NodeState,
    pub candidate_priority: i32,
    pub replication_quorum: bool,
    /// Present when the monitor assigned or normalized the node name.
    pub name: Option<String>,
}

/// Everything `register_node` needs.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub formation: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub system_identifier: u64,
    pub desired_group_id: i64,
    pub initial_state: NodeState,
    pub kind: NodeKind,
    pub candidate_priority: i32,
    pub replication_quorum: bool,
}

/// The keeper's side of the per-tick `node_active` exchange.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub formation: String,
    pub node_id: i64,
    pub group_id: i64,
    pub current_state: NodeState,
    pub db_is_running: bool,
    pub current_lsn: Lsn,
    pub sync_state: String,
}

/// The monitor extension versions: what the monitor would install by default
/// and what is actually installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionVersions {
    pub default_version: String,
    pub installed_version: String,
}

/// A state-transition event published on the monitor's `state` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNotification {
    pub formation: String,
    pub node_id: i64,
    pub group_id: i64,
    pub current_state: NodeState,
    pub goal_state: NodeState,
}

/// A notification received out-of-band from the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    State(StateNotification),
    Log(String),
}

/// A predicate over state notifications for `wait_for_notification`.
pub type NotificationPredicate = Box<dyn Fn(&StateNotification) -> bool + Send>;

/// The typed surface of the monitor's remote procedures. The control loop
/// owns a boxed instance; production uses [`MonitorClient`], tests use
/// scripted fakes. Implementations connect lazily and reconnect on demand, so
/// `disconnect` at the end of a loop iteration is always safe.
#[async_trait]
pub trait MonitorLink: Send {
    /// Compares the monitor's installed extension version with the version
    /// compiled into this binary, returning `ExtensionMismatch` on skew.
    async fn ensure_version_compatibility(&mut self) -> Result<(), KeeperError>;

    async fn register_node(
        &mut self,
        request: &RegistrationRequest,
    ) -> Result<MonitorAssignedState, KeeperError>;

    async fn node_active(
        &mut self,
        report: &NodeReport,
    ) -> Result<MonitorAssignedState, KeeperError>;

    async fn get_nodes(
        &mut self,
        formation: &str,
        group_id: Option<i64>,
    ) -> Result<Vec<NodeAddress>, KeeperError>;

    async fn get_other_nodes(
        &mut self,
        node_id: i64,
        state: Option<NodeState>,
    ) -> Result<Vec<NodeAddress>, KeeperError>;

    async fn get_primary(
        &mut self,
        formation: &str,
        group_id: i64,
    ) -> Result<NodeAddress, KeeperError>;

    async fn get_coordinator(
        &mut self,
        formation: &str,
    ) -> Result<Option<NodeAddress>, KeeperError>;

    async fn get_most_advanced_standby(
        &mut self,
        formation: &str,
        group_id: i64,
    ) -> Result<NodeAddress, KeeperError>;

    async fn start_maintenance(&mut self, node_id: i64) -> Result<bool, KeeperError>;

    async fn stop_maintenance(&mut self, node_id: i64) -> Result<bool, KeeperError>;

    async fn set_candidate_priority(
        &mut self,
        node_id: i64,
        priority: i32,
    ) -> Result<(), KeeperError>;

    async fn set_replication_quorum(
        &mut self,
        node_id: i64,
        quorum: bool,
    ) -> Result<(), KeeperError>;

    async fn set_formation_number_sync_standbys(
        &mut self,
        formation: &str,
        count: i32,
    ) -> Result<(), KeeperError>;

    async fn set_node_system_identifier(
        &mut self,
        node_id: i64,
        system_identifier: u64,
    ) -> Result<(), KeeperError>;

    async fn update_node_metadata(
        &mut self,
        node_id: i64,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<(), KeeperError>;

    async fn remove_node(&mut self, host: &str, port: u16) -> Result<(), KeeperError>;

    async fn perform_failover(&mut self, formation: &str, group_id: i64)
    -> Result<(), KeeperError>;

    async fn get_extension_version(&mut self) -> Result<ExtensionVersions, KeeperError>;

    /// Opens the registration transaction on the monitor.
    async fn begin(&mut self) -> Result<(), KeeperError>;

    /// Commits the registration transaction. Only called after the local
    /// state file is durably on disk.
    async fn commit(&mut self) -> Result<(), KeeperError>;

    /// Rolls the registration transaction back after a local failure.
    async fn rollback(&mut self) -> Result<(), KeeperError>;

    /// Subscribes this connection to the `state` and `log` channels.
    async fn listen(&mut self) -> Result<(), KeeperError>;

    /// Consumes notifications until `predicate` holds for a state event or
    /// `timeout` elapses. Log notifications are logged and skipped.
    async fn wait_for_notification(
        &mut self,
        timeout: Duration,
        predicate: NotificationPredicate,
    ) -> Result<Option<StateNotification>, KeeperError>;

    /// Drops the current connection. The next call reconnects.
    fn disconnect(&mut self);

    /// Replaces the connection settings (after a monitor URI reload) and
    /// drops the current connection.
    fn reconfigure(&mut self, settings: MonitorSettings);
}
