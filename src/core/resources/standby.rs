// src/core/resources/standby.rs

//! The standby replication-source configuration.
//!
//! A standby follows whatever primary the monitor reports, streaming through
//! the slot named after this node. The file is rewritten from scratch each
//! time and compared byte-for-byte with what is on disk; only a real change
//! is worth the checkpoint-then-restart it triggers.

use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::core::db::{ConnInfo, DatabaseRuntime};
use crate::core::errors::KeeperError;
use crate::core::monitor::NodeAddress;
use crate::core::resources::{slots, write_file_atomic};

/// Builds the conninfo a standby uses to stream from `primary`.
pub fn replication_source(primary: &NodeAddress, config: &Config) -> ConnInfo {
    let mut conninfo = ConnInfo::new(&primary.host, primary.port)
        .user(&config.replication.username)
        .application_name(&config.node.name)
        .ssl_mode(config.ssl.mode);
    if let Some(password) = &config.replication.password {
        conninfo = conninfo.password(password);
    }
    if let Some(ca_file) = &config.ssl.ca_file {
        conninfo = conninfo.ssl_ca_file(ca_file);
    }
    conninfo
}

/// Renders the full content of the standby configuration file.
pub fn render_standby_config(primary: &NodeAddress, node_id: i64, config: &Config) -> String {
    let conninfo = replication_source(primary, config);
    let slot = slots::slot_name(node_id);
    format!("primary_conninfo = '{conninfo}'\nprimary_slot_name = '{slot}'\n")
}

/// Ensures the standby configuration on disk points at `primary`. Returns
/// whether the database was restarted to pick up a change.
pub async fn ensure_standby_setup(
    db: &dyn DatabaseRuntime,
    path: &Path,
    primary: &NodeAddress,
    node_id: i64,
    config: &Config,
) -> Result<bool, KeeperError> {
    let desired = render_standby_config(primary, node_id, config);

    let current = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    if current == desired {
        return Ok(false);
    }

    info!(
        "Replication source changed; now following {}:{} ({})",
        primary.host, primary.port, primary.name
    );

    // Flush as much as possible before the restart cuts streaming off.
    let running = db.status().await?.running;
    if running {
        db.checkpoint().await?;
    }

    write_file_atomic(path, desired.as_bytes()).await?;
    db.restart().await?;
    Ok(true)
}
