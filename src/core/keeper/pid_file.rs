// src/core/keeper/pid_file.rs

//! The keeper's PID file, guarding against a second instance taking over the
//! same state file.

use std::path::Path;

use tracing::warn;

use crate::core::errors::KeeperError;
use crate::core::resources::write_file_atomic;

/// Whether a process with this pid exists (signal 0 probe).
fn pid_is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) succeeds, or fails with EPERM, when the process exists.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Creates the PID file for this process. A leftover file from a dead keeper
/// is replaced; a live one is a hard error.
pub async fn create(path: &Path) -> Result<(), KeeperError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let existing: i32 = contents.trim().parse().unwrap_or(0);
            if existing != 0 && existing != std::process::id() as i32 && pid_is_alive(existing) {
                return Err(KeeperError::PidFile(format!(
                    "another keeper is already running with pid {existing} (per {})",
                    path.display()
                )));
            }
            if existing != 0 {
                warn!(
                    "Replacing stale PID file {} left by pid {existing}",
                    path.display()
                );
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let contents = format!("{}\n", std::process::id());
    write_file_atomic(path, contents.as_bytes()).await
}

/// Whether the PID file still names this process. `false` means another
/// instance took over and this one must abort without touching anything.
pub async fn still_owns(path: &Path) -> Result<bool, KeeperError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        KeeperError::PidFile(format!("cannot read PID file {}: {e}", path.display()))
    })?;
    let recorded: u32 = contents.trim().parse().map_err(|e| {
        KeeperError::PidFile(format!("malformed PID file {}: {e}", path.display()))
    })?;
    Ok(recorded == std::process::id())
}

/// Removes the PID file on shutdown, tolerating its absence.
pub async fn remove(path: &Path) -> Result<(), KeeperError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
