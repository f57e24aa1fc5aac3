// src/config.rs

//! Manages keeper configuration: loading, validation, and the per-field
//! reload policy applied when a running keeper is asked to re-read its file.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::core::errors::KeeperError;
use crate::core::monitor::{MonitorSettings, NodeKind};

/// Environment override for the monitor connect timeout.
pub const CONNECT_TIMEOUT_ENV: &str = "PALISADE_CONNECT_TIMEOUT";

/// TLS requirements for replication connections, rendered into conninfo
/// strings and into the standby source configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    #[strum(serialize = "disable")]
    Disable,
    #[strum(serialize = "allow")]
    Allow,
    #[default]
    #[strum(serialize = "prefer")]
    Prefer,
    #[strum(serialize = "require")]
    Require,
    #[strum(serialize = "verify-ca")]
    VerifyCa,
    #[strum(serialize = "verify-full")]
    VerifyFull,
}

/// Identity and placement of the local node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    #[serde(default = "default_formation")]
    pub formation: String,
    /// Desired group within the formation; the monitor decides when absent.
    #[serde(default)]
    pub group: Option<i64>,
    #[serde(default = "default_dbname")]
    pub dbname: String,
    /// The database's data directory. Must never change across reloads.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default = "default_candidate_priority")]
    pub candidate_priority: i32,
    #[serde(default = "default_replication_quorum")]
    pub replication_quorum: bool,
}

fn default_formation() -> String {
    "default".to_string()
}
fn default_dbname() -> String {
    "main".to_string()
}
fn default_candidate_priority() -> i32 {
    50
}
fn default_replication_quorum() -> bool {
    true
}

/// How to reach the monitor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// `monitor://host:port` or `monitors://host:port` (TLS).
    pub uri: Url,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

/// The database controller subprocess: the command the supervisor runs and
/// the socket the keeper reaches it on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub command: Vec<String>,
    pub socket: PathBuf,
}

/// Replication credentials and base-backup knobs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReplicationConfig {
    #[serde(default = "default_replication_username")]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Throttle for base backups, e.g. "100M". Unlimited when absent.
    #[serde(default)]
    pub maximum_backup_rate: Option<String>,
    #[serde(default = "default_backup_directory")]
    pub backup_directory: PathBuf,
}

fn default_replication_username() -> String {
    "replicator".to_string()
}
fn default_backup_directory() -> PathBuf {
    PathBuf::from("palisade_data/backup")
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            username: default_replication_username(),
            password: None,
            maximum_backup_rate: None,
            backup_directory: default_backup_directory(),
        }
    }
}

/// Every timeout the control loop and its policies consult.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// The control-loop tick.
    #[serde(with = "humantime_serde", default = "default_tick")]
    pub tick: Duration,
    /// How long a primary tolerates silence from both the monitor and every
    /// standby before self-demoting. Zero disables self-demotion.
    #[serde(with = "humantime_serde", default = "default_network_partition_timeout")]
    pub network_partition: Duration,
    /// Grace period during which a primary with a failing database is still
    /// reported as running.
    #[serde(with = "humantime_serde", default = "default_restart_failure_timeout")]
    pub restart_failure: Duration,
    #[serde(default = "default_restart_failure_max_retries")]
    pub restart_failure_max_retries: u32,
    /// Overall budget for notification waits.
    #[serde(with = "humantime_serde", default = "default_listen_timeout")]
    pub listen_notifications: Duration,
}

fn default_tick() -> Duration {
    Duration::from_secs(5)
}
fn default_network_partition_timeout() -> Duration {
    Duration::from_secs(20)
}
fn default_restart_failure_timeout() -> Duration {
    Duration::from_secs(20)
}
fn default_restart_failure_max_retries() -> u32 {
    3
}
fn default_listen_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            network_partition: default_network_partition_timeout(),
            restart_failure: default_restart_failure_timeout(),
            restart_failure_max_retries: default_restart_failure_max_retries(),
            listen_notifications: default_listen_timeout(),
        }
    }
}

/// TLS material for replication and for the monitor connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SslConfig {
    #[serde(default)]
    pub mode: SslMode,
    #[serde(default)]
    pub ca_file: Option<String>,
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
}

/// Host-based-access settings applied when peers join or move.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HbaConfig {
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
    #[serde(default = "default_hba_file")]
    pub file: PathBuf,
}

fn default_auth_method() -> String {
    "trust".to_string()
}
fn default_hba_file() -> PathBuf {
    PathBuf::from("palisade_data/hba.conf")
}

impl Default for HbaConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            file: default_hba_file(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    node: NodeConfig,
    monitor: MonitorConfig,
    controller: ControllerConfig,
    #[serde(default)]
    replication: ReplicationConfig,
    #[serde(default)]
    timeouts: TimeoutConfig,
    #[serde(default)]
    ssl: SslConfig,
    #[serde(default)]
    hba: HbaConfig,
    #[serde(default = "default_state_file")]
    state_file: PathBuf,
    #[serde(default = "default_pid_file")]
    pid_file: PathBuf,
    /// Path to the standby replication-source configuration file.
    #[serde(default = "default_standby_file")]
    standby_file: PathBuf,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("palisade_data/palisade.state")
}
fn default_pid_file() -> PathBuf {
    PathBuf::from("palisade_data/palisade.pid")
}
fn default_standby_file() -> PathBuf {
    PathBuf::from("palisade_data/standby.conf")
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The validated keeper configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub node: NodeConfig,
    pub monitor: MonitorConfig,
    pub controller: ControllerConfig,
    pub replication: ReplicationConfig,
    pub timeouts: TimeoutConfig,
    pub ssl: SslConfig,
    pub hba: HbaConfig,
    pub state_file: PathBuf,
    pub pid_file: PathBuf,
    pub standby_file: PathBuf,
    pub log_level: String,
}

/// What a successful reload asks the control loop to do next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// The monitor URI changed; drop the connection and redial.
    pub reinit_monitor: bool,
    /// Name, hostname or port changed; push `update_node_metadata`.
    pub update_metadata: bool,
    /// SSL options changed; reapply database settings and, on a standby,
    /// rewrite the standby source configuration.
    pub reapply_ssl: bool,
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            node: raw.node,
            monitor: raw.monitor,
            controller: raw.controller,
            replication: raw.replication,
            timeouts: raw.timeouts,
            ssl: raw.ssl,
            hba: raw.hba,
            state_file: raw.state_file,
            pid_file: raw.pid_file,
            standby_file: raw.standby_file,
            log_level: raw.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.node.port == 0 {
            return Err(anyhow!("node.port cannot be 0"));
        }
        if self.node.name.trim().is_empty() {
            return Err(anyhow!("node.name cannot be empty"));
        }
        if self.node.hostname.trim().is_empty() {
            return Err(anyhow!("node.hostname cannot be empty"));
        }
        if self.node.data_dir.as_os_str().is_empty() {
            return Err(anyhow!("node.data_dir cannot be empty"));
        }
        if let Some(group) = self.node.group
            && group < 0
        {
            return Err(anyhow!("node.group cannot be negative"));
        }
        if self.node.candidate_priority < 0 || self.node.candidate_priority > 100 {
            return Err(anyhow!("node.candidate_priority must be between 0 and 100"));
        }
        if self.controller.command.is_empty() {
            return Err(anyhow!("controller.command cannot be empty"));
        }
        if self.replication.username.trim().is_empty() {
            return Err(anyhow!("replication.username cannot be empty"));
        }
        if self.timeouts.tick.is_zero() {
            return Err(anyhow!("timeouts.tick cannot be 0"));
        }
        if self.timeouts.restart_failure_max_retries == 0 {
            return Err(anyhow!("timeouts.restart_failure_max_retries cannot be 0"));
        }
        if matches!(self.ssl.mode, SslMode::VerifyCa | SslMode::VerifyFull)
            && self.ssl.ca_file.is_none()
        {
            return Err(anyhow!(
                "ssl.ca_file is required when ssl.mode is verify-ca or verify-full"
            ));
        }
        // Parsing the URI is deferred to MonitorSettings; surface bad schemes now.
        MonitorSettings::from_uri(&self.monitor.uri, None, self.monitor.connect_timeout)
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(())
    }

    /// Resolves the monitor connection settings, honoring the
    /// `PALISADE_CONNECT_TIMEOUT` override (seconds).
    pub fn monitor_settings(&self) -> Result<MonitorSettings, KeeperError> {
        let connect_timeout = std::env::var(CONNECT_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.monitor.connect_timeout);
        MonitorSettings::from_uri(&self.monitor.uri, self.ssl.ca_file.clone(), connect_timeout)
    }

    /// Applies a freshly parsed configuration to this one, field by field,
    /// per the reload policy. Rejected fields keep their old value; the rest
    /// are adopted. Returns what the control loop must do to catch up.
    pub fn apply_reload(&mut self, mut incoming: Config) -> ReloadOutcome {
        let mut outcome = ReloadOutcome::default();

        if incoming.node.data_dir != self.node.data_dir {
            warn!(
                "Cannot change node.data_dir from '{}' to '{}' on reload; keeping the old value.",
                self.node.data_dir.display(),
                incoming.node.data_dir.display()
            );
            incoming.node.data_dir = self.node.data_dir.clone();
        }

        if incoming.node.formation != self.node.formation {
            warn!(
                "Changing node.formation (from '{}' to '{}') requires re-registration; keeping the old value.",
                self.node.formation, incoming.node.formation
            );
            incoming.node.formation = self.node.formation.clone();
        }

        if incoming.monitor.uri != self.monitor.uri {
            outcome.reinit_monitor = true;
        }

        if incoming.node.name != self.node.name
            || incoming.node.hostname != self.node.hostname
            || incoming.node.port != self.node.port
        {
            outcome.update_metadata = true;
        }

        if incoming.ssl != self.ssl {
            outcome.reapply_ssl = true;
        }

        *self = incoming;
        outcome
    }
}
