// src/core/resources/lifecycle.rs

//! Database lifecycle helpers with start-failure accounting.

use tracing::{info, warn};

use crate::core::db::DatabaseRuntime;
use crate::core::errors::KeeperError;
use crate::core::fsm::StartRetryState;

/// Makes sure the database runs, recording failures so the reporting policy
/// can keep a struggling primary alive for its grace period. Returns whether
/// the database is running afterwards.
pub async fn ensure_started_with_retry(
    db: &dyn DatabaseRuntime,
    retry: &mut StartRetryState,
    now_secs: u64,
) -> Result<bool, KeeperError> {
    if db.status().await?.running {
        retry.reset();
        return Ok(true);
    }
    match db.start().await {
        Ok(()) => {
            info!("Database started.");
            retry.reset();
            Ok(true)
        }
        Err(e) => {
            retry.record_failure(now_secs);
            warn!(
                "Failed to start the database (attempt {}): {e}",
                retry.attempts
            );
            Ok(false)
        }
    }
}

/// Makes sure the database runs; failures surface immediately.
pub async fn ensure_started(db: &dyn DatabaseRuntime) -> Result<(), KeeperError> {
    if db.status().await?.running {
        return Ok(());
    }
    db.start().await?;
    info!("Database started.");
    Ok(())
}

/// Makes sure the database is down.
pub async fn ensure_stopped(db: &dyn DatabaseRuntime) -> Result<(), KeeperError> {
    if !db.status().await?.running {
        return Ok(());
    }
    db.stop().await?;
    info!("Database stopped.");
    Ok(())
}
