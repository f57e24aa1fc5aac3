// src/core/resources/hba.rs

//! Host-based-access rule maintenance.
//!
//! After every refresh of the peer set, the keeper makes sure each new or
//! moved peer can open regular connections to the configured database and
//! replication connections as the replication user. Rules are only ever
//! added; removals are an operator decision and are never pruned.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use tracing::{debug, info};

use crate::core::db::DatabaseRuntime;
use crate::core::errors::KeeperError;
use crate::core::monitor::NodeAddress;
use crate::core::resources::write_file_atomic;

/// The special database field that makes a rule match replication connections.
const REPLICATION_DATABASE: &str = "replication";

/// One access rule, rendered as a single configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HbaRule {
    pub database: String,
    pub user: String,
    pub address: String,
    pub auth_method: String,
}

impl HbaRule {
    pub fn render(&self) -> String {
        format!(
            "host {} {} {} {}",
            self.database, self.user, self.address, self.auth_method
        )
    }
}

/// The address forms a peer host needs rules for. A literal address gets both
/// its native form and, for IPv4, the mapped IPv6 form; a hostname is matched
/// as written and resolved by the database at connection time.
fn address_forms(host: &str) -> Vec<String> {
    if let Ok(v4) = host.parse::<Ipv4Addr>() {
        vec![format!("{v4}/32"), format!("::ffff:{v4}/128")]
    } else if let Ok(v6) = host.parse::<Ipv6Addr>() {
        vec![format!("{v6}/128")]
    } else {
        vec![host.to_string()]
    }
}

/// The rules one peer needs: a regular rule on `dbname` and a replication
/// rule for the replication user, per address form.
pub fn rules_for_peer(
    host: &str,
    dbname: &str,
    replication_user: &str,
    auth_method: &str,
) -> Vec<HbaRule> {
    let mut rules = Vec::new();
    for address in address_forms(host) {
        rules.push(HbaRule {
            database: dbname.to_string(),
            user: "all".to_string(),
            address: address.clone(),
            auth_method: auth_method.to_string(),
        });
        rules.push(HbaRule {
            database: REPLICATION_DATABASE.to_string(),
            user: replication_user.to_string(),
            address,
            auth_method: auth_method.to_string(),
        });
    }
    rules
}

/// Computes the peers that need new rules: present in `current` but not in
/// `previous`, or present in both with a different host. Uses a node-id
/// ordered merge; peers that disappeared produce nothing.
pub fn diff_peers(previous: &[NodeAddress], current: &[NodeAddress]) -> Vec<NodeAddress> {
    let mut old: Vec<&NodeAddress> = previous.iter().collect();
    let mut new: Vec<&NodeAddress> = current.iter().collect();
    old.sort_by_key(|peer| peer.node_id);
    new.sort_by_key(|peer| peer.node_id);

    let mut changed = Vec::new();
    let mut o = 0;
    for peer in new {
        while o < old.len() && old[o].node_id < peer.node_id {
            o += 1;
        }
        match old.get(o) {
            Some(existing) if existing.node_id == peer.node_id => {
                if existing.host != peer.host {
                    changed.push(peer.clone());
                }
            }
            _ => changed.push(peer.clone()),
        }
    }
    changed
}

/// Loads the access file, appends any missing rule for the changed peers, and
/// writes it back atomically. Returns whether the file changed.
pub async fn ensure_rules(
    path: &Path,
    changed_peers: &[NodeAddress],
    dbname: &str,
    replication_user: &str,
    auth_method: &str,
) -> Result<bool, KeeperError> {
    if changed_peers.is_empty() {
        return Ok(false);
    }

    let mut contents = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let mut have: std::collections::HashSet<String> =
        contents.lines().map(|line| line.trim().to_string()).collect();

    let mut added = 0usize;
    for peer in changed_peers {
        for rule in rules_for_peer(&peer.host, dbname, replication_user, auth_method) {
            let line = rule.render();
            if have.insert(line.clone()) {
                if !contents.is_empty() && !contents.ends_with('\n') {
                    contents.push('\n');
                }
                contents.push_str(&line);
                contents.push('\n');
                added += 1;
            }
        }
    }

    if added == 0 {
        return Ok(false);
    }
    write_file_atomic(path, contents.as_bytes()).await?;
    info!(
        "Added {added} access rule(s) to {} for {} peer(s)",
        path.display(),
        changed_peers.len()
    );
    Ok(true)
}

/// The per-tick entry point: diff the peer sets, add missing rules, and ask
/// the database to reload when it is running. When it is not, the edit takes
/// effect at the next start.
pub async fn ensure_peer_access(
    db: &dyn DatabaseRuntime,
    path: &Path,
    previous: &[NodeAddress],
    current: &[NodeAddress],
    dbname: &str,
    replication_user: &str,
    auth_method: &str,
    db_is_running: bool,
) -> Result<(), KeeperError> {
    let changed = diff_peers(previous, current);
    if changed.is_empty() {
        return Ok(());
    }
    let file_changed =
        ensure_rules(path, &changed, dbname, replication_user, auth_method).await?;
    if file_changed {
        if db_is_running {
            db.reload().await?;
        } else {
            debug!("Database not running; access rules apply at next start.");
        }
    }
    Ok(())
}
