// src/core/db/controller.rs

//! The client side of the database controller collaborator.
//!
//! The controller is a separate supervised subprocess that owns starting and
//! stopping the database; the keeper addresses it over a unix socket with the
//! same frame protocol the monitor speaks. Connections are opened per request
//! and dropped immediately, which keeps failure handling trivial: a dead
//! controller is just a failed request, and the supervisor restarts it.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::db::{
    ConnInfo, ControlData, DatabaseRuntime, Lsn, ProcessStatus, ReplicationSettings,
    ReplicationSlot, ServerVersion, SyncState,
};
use crate::core::errors::KeeperError;
use crate::core::monitor::protocol::{Frame, FrameCodec, split_error_frame};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(90);
const BACKUP_TIMEOUT: Duration = Duration::from_secs(3600);

/// A handle on the controller subprocess's unix socket.
#[derive(Debug, Clone)]
pub struct ControllerClient {
    socket_path: PathBuf,
}

impl ControllerClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Sends one request frame and awaits the single response frame.
    async fn request(&self, frame: Frame, timeout: Duration) -> Result<Frame, KeeperError> {
        let mut stream =
            tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
                .await
                .map_err(|_| {
                    KeeperError::Controller(format!(
                        "timed out connecting to controller socket {}",
                        self.socket_path.display()
                    ))
                })??;

        let mut codec = FrameCodec;
        let mut write_buf = BytesMut::new();
        codec.encode(frame, &mut write_buf)?;
        stream.write_all(&write_buf).await?;

        let mut read_buf = BytesMut::with_capacity(4096);
        loop {
            let read_fut = stream.read_buf(&mut read_buf);
            match tokio::time::timeout(timeout, read_fut).await {
                Ok(Ok(0)) => return Err(KeeperError::ConnectionClosed),
                Ok(Ok(_)) => {
                    if let Some(reply) = codec.decode(&mut read_buf)? {
                        return match reply {
                            Frame::Error(text) => {
                                let (_, message) = split_error_frame(&text);
                                Err(KeeperError::Controller(message))
                            }
                            other => Ok(other),
                        };
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(KeeperError::Timeout(
                        "waiting for the controller's response".into(),
                    ));
                }
            }
        }
    }

    async fn command(&self, op: &str, args: Vec<Frame>, timeout: Duration) -> Result<(), KeeperError> {
        let reply = self.request(Frame::call(op, args), timeout).await?;
        match reply {
            Frame::SimpleString(_) => Ok(()),
            other => Err(KeeperError::Controller(format!(
                "unexpected reply to '{op}': {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl DatabaseRuntime for ControllerClient {
    async fn status(&self) -> Result<ProcessStatus, KeeperError> {
        let reply = self
            .request(Frame::call("status", []), REQUEST_TIMEOUT)
            .await?;
        let Frame::Array(row) = reply else {
            return Err(KeeperError::Controller(format!(
                "unexpected reply to 'status': {reply:?}"
            )));
        };
        if row.len() != 3 {
            return Err(KeeperError::Controller(format!(
                "'status' row has {} fields, expected 3",
                row.len()
            )));
        }
        let running = row[0].as_bool()?;
        let pid = match &row[1] {
            Frame::Null => None,
            frame => Some(frame.as_integer()? as u32),
        };
        let port = match &row[2] {
            Frame::Null => None,
            frame => Some(frame.as_integer()? as u16),
        };
        Ok(ProcessStatus { running, pid, port })
    }

    async fn start(&self) -> Result<(), KeeperError> {
        self.command("start", vec![], LIFECYCLE_TIMEOUT).await
    }

    async fn stop(&self) -> Result<(), KeeperError> {
        self.command("stop", vec![], LIFECYCLE_TIMEOUT).await
    }

    async fn restart(&self) -> Result<(), KeeperError> {
        self.command("restart", vec![], LIFECYCLE_TIMEOUT).await
    }

    async fn reload(&self) -> Result<(), KeeperError> {
        self.command("reload", vec![], REQUEST_TIMEOUT).await
    }

    async fn checkpoint(&self) -> Result<(), KeeperError> {
        self.command("checkpoint", vec![], LIFECYCLE_TIMEOUT).await
    }

    async fn promote(&self) -> Result<(), KeeperError> {
        self.command("promote", vec![], LIFECYCLE_TIMEOUT).await
    }

    async fn control_data(&self) -> Result<ControlData, KeeperError> {
        let reply = self
            .request(Frame::call("control-data", []), REQUEST_TIMEOUT)
            .await?;
        let Frame::Array(row) = reply else {
            return Err(KeeperError::Controller(format!(
                "unexpected reply to 'control-data': {reply:?}"
            )));
        };
        if row.len() != 3 {
            return Err(KeeperError::Controller(format!(
                "'control-data' row has {} fields, expected 3",
                row.len()
            )));
        }
        Ok(ControlData {
            control_version: row[0].as_integer()? as u32,
            catalog_version: row[1].as_integer()? as u32,
            system_identifier: row[2].as_integer()? as u64,
        })
    }

    async fn server_version(&self) -> Result<ServerVersion, KeeperError> {
        let reply = self
            .request(Frame::call("version", []), REQUEST_TIMEOUT)
            .await?;
        let text = reply.as_text()?;
        let (major, minor) = text
            .split_once('.')
            .ok_or_else(|| KeeperError::Controller(format!("bad server version '{text}'")))?;
        Ok(ServerVersion {
            major: major
                .parse()
                .map_err(|e| KeeperError::Controller(format!("bad server version '{text}': {e}")))?,
            minor: minor
                .parse()
                .map_err(|e| KeeperError::Controller(format!("bad server version '{text}': {e}")))?,
        })
    }

    async fn is_in_recovery(&self) -> Result<bool, KeeperError> {
        self.request(Frame::call("is-in-recovery", []), REQUEST_TIMEOUT)
            .await?
            .as_bool()
    }

    async fn current_lsn(&self) -> Result<Lsn, KeeperError> {
        let text = self
            .request(Frame::call("current-lsn", []), REQUEST_TIMEOUT)
            .await?
            .as_text()?;
        Lsn::from_str(&text)
    }

    async fn sync_state(&self) -> Result<SyncState, KeeperError> {
        let text = self
            .request(Frame::call("sync-state", []), REQUEST_TIMEOUT)
            .await?
            .as_text()?;
        SyncState::from_str(&text)
            .map_err(|_| KeeperError::Controller(format!("unknown sync state '{text}'")))
    }

    async fn connected_standby_count(&self, username: &str) -> Result<usize, KeeperError> {
        let count = self
            .request(
                Frame::call("standby-count", [Frame::bulk(username)]),
                REQUEST_TIMEOUT,
            )
            .await?
            .as_integer()?;
        Ok(count.max(0) as usize)
    }

    async fn list_replication_slots(&self) -> Result<Vec<ReplicationSlot>, KeeperError> {
        let reply = self
            .request(Frame::call("list-slots", []), REQUEST_TIMEOUT)
            .await?;
        let Frame::Array(rows) = reply else {
            return Err(KeeperError::Controller(format!(
                "unexpected reply to 'list-slots': {reply:?}"
            )));
        };
        rows.into_iter()
            .map(|row| {
                let Frame::Array(fields) = row else {
                    return Err(KeeperError::Controller("bad slot row".into()));
                };
                if fields.len() != 2 {
                    return Err(KeeperError::Controller("bad slot row".into()));
                }
                Ok(ReplicationSlot {
                    name: fields[0].as_text()?,
                    restart_lsn: Lsn::from_str(&fields[1].as_text()?)?,
                })
            })
            .collect()
    }

    async fn create_replication_slot(&self, name: &str) -> Result<(), KeeperError> {
        self.command("create-slot", vec![Frame::bulk(name)], REQUEST_TIMEOUT)
            .await
    }

    async fn drop_replication_slot(&self, name: &str) -> Result<(), KeeperError> {
        self.command("drop-slot", vec![Frame::bulk(name)], REQUEST_TIMEOUT)
            .await
    }

    async fn advance_replication_slot(&self, name: &str, to: Lsn) -> Result<(), KeeperError> {
        self.command(
            "advance-slot",
            vec![Frame::bulk(name), Frame::bulk(to.to_string())],
            REQUEST_TIMEOUT,
        )
        .await
    }

    async fn apply_replication_settings(
        &self,
        settings: &ReplicationSettings,
    ) -> Result<(), KeeperError> {
        let payload = serde_json::to_string(settings)?;
        self.command("apply-settings", vec![Frame::bulk(payload)], REQUEST_TIMEOUT)
            .await
    }

    async fn base_backup(
        &self,
        source: &ConnInfo,
        backup_dir: &PathBuf,
        max_rate: Option<&str>,
    ) -> Result<(), KeeperError> {
        let mut args = vec![
            Frame::bulk(source.to_string()),
            Frame::bulk(backup_dir.display().to_string()),
        ];
        if let Some(rate) = max_rate {
            args.push(Frame::bulk(rate));
        }
        self.command("base-backup", args, BACKUP_TIMEOUT).await
    }

    async fn fast_forward(&self, source: &ConnInfo) -> Result<(), KeeperError> {
        self.command(
            "fast-forward",
            vec![Frame::bulk(source.to_string())],
            BACKUP_TIMEOUT,
        )
        .await
    }

    fn disconnect(&self) {
        // Connections are per-request; nothing is pooled.
    }
}
