// src/core/resources/slots.rs

//! Replication-slot maintenance.
//!
//! Each peer gets one physical slot named after its node id. Planning is a
//! pure diff of the observed slots against the current peer set; applying the
//! plan is idempotent, and running it twice with the same peers is a no-op.

use tracing::{debug, info};

use crate::core::db::{DatabaseRuntime, Lsn, ReplicationSlot};
use crate::core::errors::KeeperError;
use crate::core::monitor::NodeAddress;

/// Slots managed by the keeper match `palisade_node_<id>`; anything else on
/// the server belongs to somebody else and is never dropped.
pub const SLOT_NAME_PREFIX: &str = "palisade_node_";

pub fn slot_name(node_id: i64) -> String {
    format!("{SLOT_NAME_PREFIX}{node_id}")
}

/// Whether `name` matches the managed-slot pattern.
pub fn is_managed_slot(name: &str) -> bool {
    name.strip_prefix(SLOT_NAME_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn managed_slot_node_id(name: &str) -> Option<i64> {
    name.strip_prefix(SLOT_NAME_PREFIX)?.parse().ok()
}

/// Where the maintenance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMode {
    /// On the primary: create and drop only; the server advances the slots
    /// of its streaming standbys itself.
    CreateDropOnly,
    /// On a standby: create, drop, and advance to each peer's reported LSN.
    Full,
}

/// The changes one maintenance round will apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPlan {
    pub create: Vec<String>,
    pub drop: Vec<String>,
    pub advance: Vec<(String, Lsn)>,
}

impl SlotPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.drop.is_empty() && self.advance.is_empty()
    }
}

/// Computes the maintenance plan from the observed slots and the peer set.
///
/// A slot is advanced only when the peer reports a position strictly ahead of
/// the slot's restart position and different from `0/0`; equal positions are
/// skipped so an unchanged peer set plans nothing at all.
pub fn plan_slot_maintenance(
    existing: &[ReplicationSlot],
    peers: &[NodeAddress],
    mode: SlotMode,
) -> SlotPlan {
    let mut plan = SlotPlan::default();

    for peer in peers {
        let name = slot_name(peer.node_id);
        match existing.iter().find(|slot| slot.name == name) {
            None => plan.create.push(name),
            Some(slot) if mode == SlotMode::Full => {
                if !peer.lsn.is_zero() && peer.lsn > slot.restart_lsn {
                    plan.advance.push((name, peer.lsn));
                }
            }
            Some(_) => {}
        }
    }

    for slot in existing {
        let Some(node_id) = managed_slot_node_id(&slot.name) else {
            continue;
        };
        if !peers.iter().any(|peer| peer.node_id == node_id) {
            plan.drop.push(slot.name.clone());
        }
    }

    plan
}

/// Runs one maintenance round against the local database. Advancing is
/// skipped entirely when the server cannot do it safely.
pub async fn maintain_replication_slots(
    db: &dyn DatabaseRuntime,
    peers: &[NodeAddress],
    mode: SlotMode,
) -> Result<(), KeeperError> {
    let mut mode = mode;
    if mode == SlotMode::Full {
        let version = db.server_version().await?;
        if !version.supports_slot_advance() {
            debug!(
                "Server {}.{} cannot advance replication slots; create/drop only.",
                version.major, version.minor
            );
            mode = SlotMode::CreateDropOnly;
        }
    }

    let existing = db.list_replication_slots().await?;
    let plan = plan_slot_maintenance(&existing, peers, mode);
    if plan.is_empty() {
        return Ok(());
    }

    for name in &plan.create {
        info!("Creating replication slot '{name}'");
        db.create_replication_slot(name).await?;
    }
    for name in &plan.drop {
        info!("Dropping replication slot '{name}' (peer left the group)");
        db.drop_replication_slot(name).await?;
    }
    for (name, lsn) in &plan.advance {
        debug!("Advancing replication slot '{name}' to {lsn}");
        db.advance_replication_slot(name, *lsn).await?;
    }
    Ok(())
}
