// src/core/keeper/control_loop.rs

//! The keeper's reconciliation loop.
//!
//! Every tick: honor a pending reload, re-read the persisted state, sample
//! the local database, exchange state with the monitor, drive at most one FSM
//! transition, and persist. The ordering within an iteration is strict:
//! monitor reply, persist, transition, persist, close connections. The
//! monitor never hears of a state that is not yet durable on disk.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::db::{self, DatabaseRuntime};
use crate::core::errors::KeeperError;
use crate::core::fsm::{
    self, NodeState, PartitionVerdict, StartRetryState, find_transition, partition_verdict,
};
use crate::core::keeper::facts::{self, now_secs};
use crate::core::keeper::state_file::{self, KeeperState};
use crate::core::keeper::transitions::TransitionRunner;
use crate::core::keeper::pid_file;
use crate::core::monitor::{
    MAX_PEER_NODES, MonitorLink, NodeAddress, NodeReport, RegistrationRequest, RetryPolicy,
    RetryState,
};
use crate::core::resources::hba;
use crate::core::signals::SignalHandle;

/// What the loop does after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDirective {
    /// Sleep one tick, then iterate again.
    Continue,
    /// A transition happened; skip the sleep and iterate immediately.
    FastCycle,
    /// Leave the loop (stop signal, or the node was dropped).
    Exit,
}

/// The keeper's `node-active` service.
pub struct KeeperLoop {
    config: Config,
    config_path: String,
    db: Arc<dyn DatabaseRuntime>,
    monitor: Box<dyn MonitorLink>,
    signals: SignalHandle,
    /// Peers as of the last successful exchange, capped at `MAX_PEER_NODES`.
    other_nodes: Vec<NodeAddress>,
    /// The previous peer snapshot, diffed against for access-rule upkeep.
    previous_nodes: Vec<NodeAddress>,
    start_retry: StartRetryState,
    pending_metadata_update: bool,
    pending_ssl_reapply: bool,
}

impl KeeperLoop {
    pub fn new(
        config: Config,
        config_path: String,
        db: Arc<dyn DatabaseRuntime>,
        monitor: Box<dyn MonitorLink>,
        signals: SignalHandle,
    ) -> Self {
        Self {
            config,
            config_path,
            db,
            monitor,
            signals,
            other_nodes: Vec::new(),
            previous_nodes: Vec::new(),
            start_retry: StartRetryState::default(),
            pending_metadata_update: false,
            pending_ssl_reapply: false,
        }
    }

    /// Runs the loop until asked to stop, the node is dropped, or a fatal
    /// error (identity or version mismatch) surfaces.
    pub async fn run(&mut self) -> Result<(), KeeperError> {
        pid_file::create(&self.config.pid_file).await?;
        info!(
            "Keeper started for node '{}' in formation '{}'",
            self.config.node.name, self.config.node.formation
        );

        let mut first_iteration = true;
        let mut directive = LoopDirective::FastCycle;
        loop {
            if self.signals.take_reload() && !first_iteration {
                self.reload_config();
            }
            if self.signals.asked_to_stop() {
                break;
            }
            if directive != LoopDirective::FastCycle {
                self.signals.sleep(self.config.timeouts.tick).await;
            }
            if self.signals.asked_to_stop() {
                break;
            }
            first_iteration = false;

            directive = self.run_once().await?;
            if directive == LoopDirective::Exit {
                break;
            }
        }

        pid_file::remove(&self.config.pid_file).await?;
        info!("Keeper stopped.");
        Ok(())
    }

    /// Re-reads the configuration file and applies the per-field reload
    /// policy. The monitor connection is always closed so that a changed URI
    /// takes effect on the next call.
    fn reload_config(&mut self) {
        info!("Reloading configuration from '{}'", self.config_path);
        match Config::from_file(&self.config_path) {
            Ok(incoming) => {
                let outcome = self.config.apply_reload(incoming);
                if outcome.reinit_monitor {
                    match self.config.monitor_settings() {
                        Ok(settings) => {
                            info!("Monitor URI changed; reconnecting.");
                            self.monitor.reconfigure(settings);
                        }
                        Err(e) => warn!("New monitor settings are unusable: {e}"),
                    }
                } else {
                    self.monitor.disconnect();
                }
                self.pending_metadata_update |= outcome.update_metadata;
                self.pending_ssl_reapply |= outcome.reapply_ssl;
            }
            Err(e) => {
                warn!("Configuration reload failed, keeping the previous one: {e:#}");
            }
        }
    }

    /// One full iteration of the reconciliation loop.
    pub async fn run_once(&mut self) -> Result<LoopDirective, KeeperError> {
        // Another instance taking over the PID file means this process must
        // not touch the state file again.
        if !pid_file::still_owns(&self.config.pid_file).await? {
            return Err(KeeperError::PidFile(format!(
                "PID file {} no longer names this process; another keeper took over",
                self.config.pid_file.display()
            )));
        }

        // Always re-read the state: if the previous persist failed half-way,
        // disk is the only truth worth trusting.
        let mut state = match state_file::load(&self.config.state_file).await? {
            Some(state) => state,
            None => {
                self.register().await?;
                return Ok(LoopDirective::FastCycle);
            }
        };

        if self.signals.fast_stop() {
            return Ok(LoopDirective::Exit);
        }

        // Sample the local database and verify its identity.
        let db_facts = db::sample_facts(self.db.as_ref()).await;
        if db_facts.is_running {
            facts::verify_port(self.config.node.port, &db_facts)?;
            match self.db.control_data().await {
                Ok(control) => {
                    facts::verify_identity(&state, &control)?;
                    if facts::refresh_identity(&mut state, &control) && state.node_id != 0 {
                        if let Err(e) = self
                            .monitor
                            .set_node_system_identifier(state.node_id, control.system_identifier)
                            .await
                        {
                            warn!("Could not push the system identifier to the monitor: {e}");
                        }
                    }
                }
                Err(e) => debug!("Control data unavailable this tick: {e}"),
            }
        }

        // A primary keeps track of when it last saw one of its standbys; the
        // partition policy hinges on that timestamp.
        let mut standby_connected = false;
        if state.current_role == NodeState::Primary && db_facts.is_running {
            standby_connected = self
                .db
                .connected_standby_count(&self.config.replication.username)
                .await
                .unwrap_or(0)
                > 0;
            if standby_connected {
                state.last_secondary_contact = now_secs();
            }
        }

        if self.signals.fast_stop() {
            return Ok(LoopDirective::Exit);
        }

        // Exchange state with the monitor.
        let monitor_reachable = match self.exchange_with_monitor(&mut state, &db_facts).await {
            Ok(()) => true,
            Err(e @ KeeperError::ExtensionMismatch { .. }) => return Err(e),
            Err(e @ KeeperError::NodeIdChanged { .. }) => return Err(e),
            Err(e) => {
                warn!("Monitor exchange failed: {e}");
                if state.current_role == NodeState::Primary {
                    self.consider_self_demotion(&mut state, standby_connected);
                }
                false
            }
        };

        // Persist what the monitor told us (or the demotion we decided on)
        // before acting on it. Even a failed exchange is persisted so the
        // partition timestamps keep advancing across restarts.
        state_file::store(&self.config.state_file, &state).await?;

        if self.signals.fast_stop() {
            return Ok(LoopDirective::Exit);
        }

        // Once the monitor has confirmed the drop, forget the node.
        if monitor_reachable
            && state.current_role == NodeState::Dropped
            && state.assigned_role == NodeState::Dropped
        {
            return self.dropped_epilogue().await;
        }

        let mut directive = LoopDirective::Continue;
        if state.assigned_role != state.current_role {
            directive = self.attempt_transition(&mut state).await;
        } else if monitor_reachable && state.current_role != NodeState::Dropped {
            // Keep-alive: normalize the local database for the current role.
            let current_role = state.current_role;
            let mut runner = TransitionRunner {
                config: &self.config,
                db: self.db.as_ref(),
                monitor: self.monitor.as_mut(),
                state: &mut state,
                other_nodes: &self.other_nodes,
                start_retry: &mut self.start_retry,
            };
            if let Err(e) = runner.ensure_current_state(current_role).await {
                warn!("Keep-alive for state {current_role} failed: {e}");
            }
        }

        // Short-lived connections: drop whatever this iteration opened.
        self.monitor.disconnect();
        self.db.disconnect();

        state_file::store(&self.config.state_file, &state).await?;
        Ok(directive)
    }

    /// Step 7 of the loop: version check, `node_active`, peer refresh,
    /// access-rule upkeep, and the deferred reload consequences.
    async fn exchange_with_monitor(
        &mut self,
        state: &mut KeeperState,
        db_facts: &db::DbFacts,
    ) -> Result<(), KeeperError> {
        self.monitor.ensure_version_compatibility().await?;

        let report = NodeReport {
            formation: self.config.node.formation.clone(),
            node_id: state.node_id,
            group_id: state.group_id,
            current_state: state.current_role,
            db_is_running: fsm::report_db_running(
                state.current_role,
                db_facts.is_running,
                &self.start_retry,
                now_secs(),
                self.config.timeouts.restart_failure,
                self.config.timeouts.restart_failure_max_retries,
            ),
            current_lsn: db_facts.current_lsn,
            sync_state: db_facts.sync_state.to_string(),
        };

        let assigned = self.monitor.node_active(&report).await?;
        if state.node_id != 0 && assigned.node_id != state.node_id {
            return Err(KeeperError::NodeIdChanged {
                cached: state.node_id,
                assigned: assigned.node_id,
            });
        }

        state.last_monitor_contact = now_secs();
        if assigned.group_id != state.group_id {
            info!(
                "Monitor moved this node from group {} to group {}",
                state.group_id, assigned.group_id
            );
            state.group_id = assigned.group_id;
            self.pending_ssl_reapply = true;
        }
        if assigned.state != state.assigned_role {
            info!(
                "Monitor assigned goal state {} (currently {})",
                assigned.state, state.current_role
            );
        }
        state.assigned_role = assigned.state;

        match self.monitor.get_other_nodes(state.node_id, None).await {
            Ok(mut nodes) => {
                if nodes.len() > MAX_PEER_NODES {
                    warn!(
                        "Monitor reported {} peers; keeping the first {MAX_PEER_NODES}",
                        nodes.len()
                    );
                    nodes.truncate(MAX_PEER_NODES);
                }
                self.previous_nodes = std::mem::replace(&mut self.other_nodes, nodes);
            }
            Err(e) => warn!("Could not refresh the peer list: {e}"),
        }

        // Access rules for new or moved peers. Local I/O trouble here is a
        // next-tick concern, not a failed exchange.
        if let Err(e) = hba::ensure_peer_access(
            self.db.as_ref(),
            &self.config.hba.file,
            &self.previous_nodes,
            &self.other_nodes,
            &self.config.node.dbname,
            &self.config.replication.username,
            &self.config.hba.auth_method,
            db_facts.is_running,
        )
        .await
        {
            warn!("Access-rule maintenance failed: {e}");
        }

        if self.pending_metadata_update && state.node_id != 0 {
            match self
                .monitor
                .update_node_metadata(
                    state.node_id,
                    &self.config.node.name,
                    &self.config.node.hostname,
                    self.config.node.port,
                )
                .await
            {
                Ok(()) => {
                    info!("Pushed updated node metadata to the monitor.");
                    self.pending_metadata_update = false;
                }
                Err(e) => warn!("Could not update node metadata: {e}"),
            }
        }

        if self.pending_ssl_reapply {
            let mut runner = TransitionRunner {
                config: &self.config,
                db: self.db.as_ref(),
                monitor: self.monitor.as_mut(),
                state: &mut *state,
                other_nodes: &self.other_nodes,
                start_retry: &mut self.start_retry,
            };
            match runner.run(fsm::TransitionAction::ApplyReplicationSettings).await {
                Ok(()) => self.pending_ssl_reapply = false,
                Err(e) => warn!("Could not reapply replication settings: {e}"),
            }
        }

        Ok(())
    }

    /// The network-partition policy for a primary that lost the monitor.
    fn consider_self_demotion(&self, state: &mut KeeperState, standby_connected: bool) {
        let verdict = partition_verdict(
            now_secs(),
            state.last_monitor_contact,
            state.last_secondary_contact,
            self.config.timeouts.network_partition,
            standby_connected,
        );
        match verdict {
            PartitionVerdict::StandbyStillConnected => {
                debug!("Monitor unreachable but a standby is still streaming; staying primary.");
            }
            PartitionVerdict::RemainPrimary => {}
            PartitionVerdict::Demote => {
                error!(
                    "Partition suspected: no monitor contact since {}s and no standby \
                     contact since {}s (timeout {}s). Stepping down to avoid a split brain.",
                    now_secs().saturating_sub(state.last_monitor_contact),
                    now_secs().saturating_sub(state.last_secondary_contact),
                    self.config.timeouts.network_partition.as_secs()
                );
                state.assigned_role = NodeState::DemoteTimeout;
            }
        }
    }

    /// Steps 9 of the loop: ensure-then-transition.
    async fn attempt_transition(&mut self, state: &mut KeeperState) -> LoopDirective {
        let current = state.current_role;
        let assigned = state.assigned_role;
        let skip_ensure =
            current.implies_database_down() || assigned.implies_database_down();

        let mut runner = TransitionRunner {
            config: &self.config,
            db: self.db.as_ref(),
            monitor: self.monitor.as_mut(),
            state: &mut *state,
            other_nodes: &self.other_nodes,
            start_retry: &mut self.start_retry,
        };

        if !skip_ensure
            && let Err(e) = runner.ensure_current_state(current).await
        {
            warn!("Could not normalize state {current} before transitioning: {e}");
            return LoopDirective::Continue;
        }

        let Some(rule) = find_transition(current, assigned) else {
            warn!("The FSM has no path from {current} to {assigned}; holding position.");
            return LoopDirective::Continue;
        };

        info!("Transition from {current} to {assigned}: {}", rule.comment);
        match runner.run(rule.action).await {
            Ok(()) => {
                state.current_role = assigned;
                info!("Reached state {assigned}.");
                LoopDirective::FastCycle
            }
            Err(e) => {
                warn!("Transition from {current} to {assigned} failed: {e}; retrying next tick.");
                LoopDirective::Continue
            }
        }
    }

    /// First-boot registration, wrapped in an explicit remote transaction.
    /// The state file is created if and only if the transaction commits.
    async fn register(&mut self) -> Result<(), KeeperError> {
        info!(
            "No state file at {}; registering with the monitor.",
            self.config.state_file.display()
        );

        // The database may not exist yet at registration time; a zero system
        // identifier is pushed later, once the database reports one.
        let control = self.db.control_data().await.unwrap_or_default();
        let request = RegistrationRequest {
            formation: self.config.node.formation.clone(),
            name: self.config.node.name.clone(),
            host: self.config.node.hostname.clone(),
            port: self.config.node.port,
            dbname: self.config.node.dbname.clone(),
            system_identifier: control.system_identifier,
            desired_group_id: self.config.node.group.unwrap_or(-1),
            initial_state: NodeState::Init,
            kind: self.config.node.kind,
            candidate_priority: self.config.node.candidate_priority,
            replication_quorum: self.config.node.replication_quorum,
        };

        let mut retry = RetryState::new(RetryPolicy::init());
        loop {
            if self.signals.asked_to_stop() {
                return Err(KeeperError::AskedToStop);
            }

            if let Err(e) = self.monitor.begin().await {
                if e.is_retryable() && !retry.expired(self.signals.asked_to_stop()) {
                    let sleep = retry.next_sleep();
                    info!("Monitor unreachable ({e}); retrying registration in {sleep:?}");
                    self.signals.sleep(sleep).await;
                    continue;
                }
                return Err(e);
            }
            match self.monitor.register_node(&request).await {
                Ok(assigned) => {
                    let state = KeeperState {
                        node_id: assigned.node_id,
                        group_id: assigned.group_id,
                        current_role: NodeState::Init,
                        assigned_role: assigned.state,
                        control_version: control.control_version,
                        catalog_version: control.catalog_version,
                        system_identifier: control.system_identifier,
                        ..KeeperState::default()
                    };
                    if let Err(e) = state_file::store(&self.config.state_file, &state).await {
                        let _ = self.monitor.rollback().await;
                        let _ = state_file::remove(&self.config.state_file).await;
                        return Err(e);
                    }
                    if let Err(e) = self.monitor.commit().await {
                        let _ = state_file::remove(&self.config.state_file).await;
                        return Err(e);
                    }
                    info!(
                        "Registered as node {} in group {} with goal state {}",
                        assigned.node_id, assigned.group_id, assigned.state
                    );
                    return Ok(());
                }
                Err(e) if e.is_exclusion_violation() => {
                    let _ = self.monitor.rollback().await;
                    return Err(KeeperError::Registration(format!(
                        "a node already exists in this group with a different system \
                         identifier; refusing to join ({e})"
                    )));
                }
                Err(e)
                    if (e.is_object_in_use() || e.is_retryable())
                        && !retry.expired(self.signals.asked_to_stop()) =>
                {
                    let _ = self.monitor.rollback().await;
                    let sleep = retry.next_sleep();
                    info!("Monitor busy ({e}); retrying registration in {sleep:?}");
                    self.signals.sleep(sleep).await;
                }
                Err(e) => {
                    let _ = self.monitor.rollback().await;
                    return Err(e);
                }
            }
        }
    }

    /// The node was dropped and the monitor knows: ask it to forget us, then
    /// remove the local files and leave the loop.
    async fn dropped_epilogue(&mut self) -> Result<LoopDirective, KeeperError> {
        info!("Node dropped from the formation; cleaning up.");
        if let Err(e) = self
            .monitor
            .remove_node(&self.config.node.hostname, self.config.node.port)
            .await
        {
            warn!("Could not ask the monitor to forget this node: {e}");
        }
        state_file::remove(&self.config.state_file).await?;
        pid_file::remove(&self.config.pid_file).await?;
        Ok(LoopDirective::Exit)
    }
}
