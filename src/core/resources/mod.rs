// src/core/resources/mod.rs

//! Local resources the keeper manages around the database: crash-safe files,
//! lifecycle with start-failure accounting, replication slots, host-based
//! access rules, and the standby replication-source configuration.

pub mod hba;
pub mod lifecycle;
pub mod slots;
pub mod standby;

use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::core::errors::KeeperError;

/// Writes `contents` to `<path>.new`, fsyncs, then atomically renames over
/// `path`. Readers never observe a partial file.
pub async fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<(), KeeperError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".new");
    let temp_path = Path::new(&temp_path);

    let mut file = tokio::fs::File::create(temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(temp_path, path).await {
        // Leave no half-written temp file behind.
        let _ = tokio::fs::remove_file(temp_path).await;
        return Err(e.into());
    }
    Ok(())
}
