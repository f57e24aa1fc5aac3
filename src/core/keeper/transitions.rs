// src/core/keeper/transitions.rs

//! Executes the actions named by the transition table, and the
//! `ensure_current_state` normalization run before transitions and as the
//! keep-alive when nothing is pending.

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::db::{DatabaseRuntime, ReplicationSettings};
use crate::core::errors::KeeperError;
use crate::core::fsm::{NodeState, StartRetryState, TransitionAction};
use crate::core::keeper::facts::now_secs;
use crate::core::keeper::state_file::KeeperState;
use crate::core::monitor::{MonitorLink, NodeAddress};
use crate::core::resources::{lifecycle, slots, standby, write_file_atomic};

/// Builds the synchronous-standby requirement from the known peers: any one
/// standby may acknowledge, none required when the node has no peers.
pub fn synchronous_standby_names(peers: &[NodeAddress]) -> String {
    let standbys: Vec<&str> = peers
        .iter()
        .filter(|peer| !peer.is_primary)
        .map(|peer| peer.name.as_str())
        .collect();
    if standbys.is_empty() {
        String::new()
    } else {
        format!("ANY 1 ({})", standbys.join(", "))
    }
}

fn replication_settings(config: &Config, peers: &[NodeAddress]) -> ReplicationSettings {
    ReplicationSettings {
        synchronous_standby_names: synchronous_standby_names(peers),
        listen_addresses: "*".to_string(),
        ssl_enabled: config.ssl.mode != crate::config::SslMode::Disable,
    }
}

/// Everything a transition may touch. Borrowed fresh for each iteration of
/// the control loop, which owns the concrete instances.
pub struct TransitionRunner<'a> {
    pub config: &'a Config,
    pub db: &'a dyn DatabaseRuntime,
    pub monitor: &'a mut dyn MonitorLink,
    pub state: &'a mut KeeperState,
    pub other_nodes: &'a [NodeAddress],
    pub start_retry: &'a mut StartRetryState,
}

impl<'a> TransitionRunner<'a> {
    /// The primary this node should stream from: the peer the monitor marked
    /// as primary, or a direct lookup when the peer cache does not know yet.
    async fn current_primary(&mut self) -> Result<NodeAddress, KeeperError> {
        if let Some(primary) = self.other_nodes.iter().find(|peer| peer.is_primary) {
            return Ok(primary.clone());
        }
        self.monitor
            .get_primary(&self.config.node.formation, self.state.group_id)
            .await
    }

    async fn ensure_standby_setup(&mut self) -> Result<(), KeeperError> {
        let primary = self.current_primary().await?;
        standby::ensure_standby_setup(
            self.db,
            &self.config.standby_file,
            &primary,
            self.state.node_id,
            self.config,
        )
        .await?;
        Ok(())
    }

    async fn apply_settings(&mut self) -> Result<(), KeeperError> {
        let settings = replication_settings(self.config, self.other_nodes);
        self.db.apply_replication_settings(&settings).await?;
        if self.db.status().await?.running {
            self.db.reload().await?;
        }
        Ok(())
    }

    /// Normalizes the local database for `role` before a transition, and as
    /// the keep-alive between transitions.
    ///
    /// For the demoted family of states this only ever stops the database;
    /// callers skip the call entirely before a transition into or out of
    /// those states, where even sampling could race a promotion elsewhere.
    pub async fn ensure_current_state(&mut self, role: NodeState) -> Result<(), KeeperError> {
        match role {
            NodeState::Primary => {
                let running =
                    lifecycle::ensure_started_with_retry(self.db, self.start_retry, now_secs())
                        .await?;
                if running {
                    slots::maintain_replication_slots(
                        self.db,
                        self.other_nodes,
                        slots::SlotMode::CreateDropOnly,
                    )
                    .await?;
                }
            }
            NodeState::Single => {
                lifecycle::ensure_started(self.db).await?;
                slots::maintain_replication_slots(
                    self.db,
                    self.other_nodes,
                    slots::SlotMode::CreateDropOnly,
                )
                .await?;
            }
            NodeState::WaitPrimary | NodeState::PrepPromotion | NodeState::StopReplication => {
                lifecycle::ensure_started(self.db).await?;
            }
            NodeState::Secondary => {
                lifecycle::ensure_started(self.db).await?;
                self.ensure_standby_setup().await?;
                slots::maintain_replication_slots(
                    self.db,
                    self.other_nodes,
                    slots::SlotMode::Full,
                )
                .await?;
            }
            NodeState::CatchingUp => {
                // No slot maintenance here: advancing can fail against a
                // restart point older than the peers' reported positions.
                lifecycle::ensure_started(self.db).await?;
                self.ensure_standby_setup().await?;
            }
            NodeState::Demoted | NodeState::DemoteTimeout | NodeState::Draining => {
                lifecycle::ensure_stopped(self.db).await?;
            }
            NodeState::Maintenance => {
                self.ensure_standby_setup().await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Runs one transition action. Success means the control loop may advance
    /// `current_role`; failure leaves it unchanged for a retry next tick.
    pub async fn run(&mut self, action: TransitionAction) -> Result<(), KeeperError> {
        match action {
            TransitionAction::BootstrapAsSingle => {
                lifecycle::ensure_started(self.db).await?;
            }
            TransitionAction::PrepareAsPrimary => {
                lifecycle::ensure_started(self.db).await?;
                self.apply_settings().await?;
            }
            TransitionAction::Confirm => {}
            TransitionAction::DisableSyncReplication => {
                let settings = ReplicationSettings {
                    synchronous_standby_names: String::new(),
                    ..replication_settings(self.config, self.other_nodes)
                };
                self.db.apply_replication_settings(&settings).await?;
                self.db.reload().await?;
                warn!("Synchronous replication disabled while the standby is away.");
            }
            TransitionAction::ContinueAsSingle => {
                lifecycle::ensure_started(self.db).await?;
                let settings = ReplicationSettings {
                    synchronous_standby_names: String::new(),
                    ..replication_settings(self.config, self.other_nodes)
                };
                self.db.apply_replication_settings(&settings).await?;
                self.db.reload().await?;
            }
            TransitionAction::ApplyReplicationSettings => {
                self.apply_settings().await?;
            }
            TransitionAction::InitAsStandby => {
                // Provisioning created the data directory; nothing to do
                // until the monitor lets us clone the primary.
                debug!("Waiting for permission to clone the primary.");
            }
            TransitionAction::BaseBackupAndFollow => {
                let primary = self.current_primary().await?;
                let source = standby::replication_source(&primary, self.config);
                info!(
                    "Cloning {}:{} into {}",
                    primary.host,
                    primary.port,
                    self.config.replication.backup_directory.display()
                );
                self.db
                    .base_backup(
                        &source,
                        &self.config.replication.backup_directory,
                        self.config.replication.maximum_backup_rate.as_deref(),
                    )
                    .await?;
                self.ensure_standby_setup().await?;
                lifecycle::ensure_started(self.db).await?;
            }
            TransitionAction::ResumeCatchingUp => {
                self.ensure_standby_setup().await?;
                lifecycle::ensure_started(self.db).await?;
            }
            TransitionAction::PreparePromotion => {
                lifecycle::ensure_started(self.db).await?;
                if !self.db.is_in_recovery().await? {
                    return Err(KeeperError::Internal(
                        "asked to prepare promotion of a node that is not a standby".into(),
                    ));
                }
            }
            TransitionAction::StopReplicationStage => {
                // Cut the link to the old primary without leaving recovery:
                // an empty source file keeps the database replaying only
                // what it already holds.
                self.db.checkpoint().await?;
                write_file_atomic(&self.config.standby_file, b"").await?;
                self.db.restart().await?;
            }
            TransitionAction::PromoteStandby => {
                lifecycle::ensure_started(self.db).await?;
                self.db.promote().await?;
                info!("Promoted out of recovery.");
            }
            TransitionAction::StopDatabase => {
                lifecycle::ensure_stopped(self.db).await?;
            }
            TransitionAction::ConfirmStopped => {
                lifecycle::ensure_stopped(self.db).await?;
            }
            TransitionAction::RejoinAsStandby => {
                self.ensure_standby_setup().await?;
                lifecycle::ensure_started(self.db).await?;
            }
            TransitionAction::ReportWalPosition => {
                // The position travels with the next node_active report; all
                // this stage needs is a database that answers the query.
                lifecycle::ensure_started(self.db).await?;
            }
            TransitionAction::FastForwardWal => {
                let source = self
                    .monitor
                    .get_most_advanced_standby(&self.config.node.formation, self.state.group_id)
                    .await?;
                info!(
                    "Fast-forwarding from the most advanced standby {} ({}:{})",
                    source.name, source.host, source.port
                );
                let conninfo = standby::replication_source(&source, self.config);
                self.db.fast_forward(&conninfo).await?;
            }
            TransitionAction::FollowNewPrimary => {
                self.ensure_standby_setup().await?;
                lifecycle::ensure_started(self.db).await?;
            }
            TransitionAction::WaitBeforeMaintenance => {}
            TransitionAction::EnterMaintenance => {
                info!("Entering maintenance; the operator owns the database now.");
            }
            TransitionAction::DemoteForMaintenance => {
                lifecycle::ensure_stopped(self.db).await?;
            }
            TransitionAction::DropNode => {
                lifecycle::ensure_stopped(self.db).await?;
            }
        }
        Ok(())
    }
}
