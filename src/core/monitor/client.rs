// src/core/monitor/client.rs

//! The production implementation of [`MonitorLink`]: a typed, internal,
//! asynchronous client for the monitor's remote procedures.
//!
//! The client connects lazily, reconnects on demand, and is dropped at the
//! end of every control-loop iteration; short-lived connections keep failure
//! handling simple. Notifications pushed by the monitor on a listening
//! connection are buffered while a call is in flight and consumed by
//! `wait_for_notification`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use crate::core::db::Lsn;
use crate::core::errors::KeeperError;
use crate::core::fsm::NodeState;
use crate::core::monitor::protocol::{Frame, FrameCodec, split_error_frame};
use crate::core::monitor::{
    EXTENSION_VERSION_ENV, ExtensionVersions, MONITOR_EXTENSION_VERSION, MonitorAssignedState,
    MonitorLink, MonitorSettings, NodeAddress, NodeReport, Notification, NotificationPredicate,
    RegistrationRequest, StateNotification,
};

/// How long a single remote call may wait for its response frame.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll granularity while waiting for notifications, so stop signals are
/// observed promptly even during long waits.
const NOTIFICATION_POLL: Duration = Duration::from_secs(1);

// An enum to abstract over plain TCP and TLS connections to the monitor,
// letting the call logic be generic over the transport.
enum MonitorStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MonitorStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MonitorStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            MonitorStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MonitorStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            MonitorStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            MonitorStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            MonitorStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            MonitorStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            MonitorStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            MonitorStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

struct Connection {
    stream: MonitorStream,
    codec: FrameCodec,
    read_buf: BytesMut,
}

/// The typed monitor client.
pub struct MonitorClient {
    settings: MonitorSettings,
    conn: Option<Connection>,
    listening: bool,
    pending: VecDeque<Notification>,
}

impl MonitorClient {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            conn: None,
            listening: false,
            pending: VecDeque::new(),
        }
    }

    async fn connect(&mut self) -> Result<(), KeeperError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let addr = (self.settings.host.as_str(), self.settings.port);
        let tcp = tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                KeeperError::Timeout(format!(
                    "connecting to monitor {}:{}",
                    self.settings.host, self.settings.port
                ))
            })??;

        let stream = if self.settings.tls {
            let connector = self.tls_connector()?;
            let server_name = rustls::pki_types::ServerName::try_from(self.settings.host.clone())
                .map_err(|e| KeeperError::Config(format!("bad monitor host name: {e}")))?;
            let tls = tokio::time::timeout(
                self.settings.connect_timeout,
                connector.connect(server_name, tcp),
            )
            .await
            .map_err(|_| KeeperError::Timeout("monitor TLS handshake".into()))??;
            MonitorStream::Tls(Box::new(tls))
        } else {
            MonitorStream::Tcp(tcp)
        };

        debug!(
            "Connected to monitor at {}:{} (tls: {})",
            self.settings.host, self.settings.port, self.settings.tls
        );
        self.conn = Some(Connection {
            stream,
            codec: FrameCodec,
            read_buf: BytesMut::with_capacity(4096),
        });
        // A fresh connection is not subscribed to anything yet.
        self.listening = false;
        Ok(())
    }

    fn tls_connector(&self) -> Result<TlsConnector, KeeperError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ca_file) = &self.settings.ca_file {
            let ca_bytes = std::fs::read(ca_file).map_err(|e| {
                KeeperError::Config(format!("cannot read monitor CA file '{ca_file}': {e}"))
            })?;
            let mut reader = std::io::Cursor::new(ca_bytes);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    KeeperError::Config(format!("bad certificate in '{ca_file}': {e}"))
                })?;
                roots.add(cert).map_err(|e| {
                    KeeperError::Config(format!("cannot trust certificate from '{ca_file}': {e}"))
                })?;
            }
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }

    /// Reads the next frame, with a timeout. Notification pushes are buffered
    /// and skipped, so callers only ever see call responses.
    async fn next_response(&mut self, timeout: Duration) -> Result<Frame, KeeperError> {
        loop {
            let frame = self.next_frame(timeout).await?;
            match parse_notification(&frame)? {
                Some(notification) => self.pending.push_back(notification),
                None => return Ok(frame),
            }
        }
    }

    async fn next_frame(&mut self, timeout: Duration) -> Result<Frame, KeeperError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or(KeeperError::ConnectionClosed)?;
        loop {
            if let Some(frame) = conn.codec.decode(&mut conn.read_buf)? {
                return Ok(frame);
            }
            let read_fut = conn.stream.read_buf(&mut conn.read_buf);
            match tokio::time::timeout(timeout, read_fut).await {
                Ok(Ok(0)) => return Err(KeeperError::ConnectionClosed),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(KeeperError::Timeout(
                        "waiting for the monitor's response".into(),
                    ));
                }
            }
        }
    }

    /// Issues one remote procedure call and returns its response frame.
    /// Any transport failure drops the connection so the next call redials.
    async fn call(&mut self, proc: &str, args: Vec<Frame>) -> Result<Frame, KeeperError> {
        let result = self.call_inner(proc, args).await;
        if matches!(
            result,
            Err(KeeperError::Io(_))
                | Err(KeeperError::ConnectionClosed)
                | Err(KeeperError::Timeout(_))
                | Err(KeeperError::Protocol(_))
        ) {
            self.disconnect();
        }
        result
    }

    async fn call_inner(&mut self, proc: &str, args: Vec<Frame>) -> Result<Frame, KeeperError> {
        self.connect().await?;
        let frame = Frame::call(proc, args);
        {
            let conn = self.conn.as_mut().ok_or(KeeperError::ConnectionClosed)?;
            let mut write_buf = BytesMut::new();
            conn.codec.encode(frame, &mut write_buf)?;
            conn.stream.write_all(&write_buf).await?;
        }
        match self.next_response(CALL_TIMEOUT).await? {
            Frame::Error(text) => {
                let (code, message) = split_error_frame(&text);
                Err(KeeperError::Monitor { code, message })
            }
            frame => Ok(frame),
        }
    }

    fn expected_extension_version() -> String {
        std::env::var(EXTENSION_VERSION_ENV)
            .unwrap_or_else(|_| MONITOR_EXTENSION_VERSION.to_string())
    }
}

/// Parses a pushed `["notify", channel, payload]` frame; `Ok(None)` means the
/// frame is a regular call response.
fn parse_notification(frame: &Frame) -> Result<Option<Notification>, KeeperError> {
    let Frame::Array(parts) = frame else {
        return Ok(None);
    };
    if parts.len() != 3 {
        return Ok(None);
    }
    let Ok(tag) = parts[0].as_text() else {
        return Ok(None);
    };
    if tag != "notify" {
        return Ok(None);
    }
    let channel = parts[1].as_text()?;
    let payload = parts[2].as_text()?;
    match channel.as_str() {
        "state" => {
            let event: StateNotification = serde_json::from_str(&payload)?;
            Ok(Some(Notification::State(event)))
        }
        "log" => Ok(Some(Notification::Log(payload))),
        other => {
            warn!("Ignoring notification on unknown channel '{other}'");
            Ok(Some(Notification::Log(payload)))
        }
    }
}

fn parse_assigned_state(frame: &Frame) -> Result<MonitorAssignedState, KeeperError> {
    let Frame::Array(row) = frame else {
        return Err(KeeperError::Protocol(format!(
            "expected an assigned-state row, got {frame:?}"
        )));
    };
    if row.len() < 5 {
        return Err(KeeperError::Protocol(format!(
            "assigned-state row has {} fields, expected at least 5",
            row.len()
        )));
    }
    let state_name = row[2].as_text()?;
    let state = NodeState::from_str(&state_name)
        .map_err(|_| KeeperError::Protocol(format!("unknown node state '{state_name}'")))?;
    let name = match row.get(5) {
        Some(Frame::Null) | None => None,
        Some(frame) => Some(frame.as_text()?),
    };
    Ok(MonitorAssignedState {
        node_id: row[0].as_integer()?,
        group_id: row[1].as_integer()?,
        state,
        candidate_priority: row[3].as_integer()? as i32,
        replication_quorum: row[4].as_bool()?,
        name,
    })
}

fn parse_node_address(frame: &Frame) -> Result<NodeAddress, KeeperError> {
    let Frame::Array(row) = frame else {
        return Err(KeeperError::Protocol(format!(
            "expected a node row, got {frame:?}"
        )));
    };
    if row.len() != 6 {
        return Err(KeeperError::Protocol(format!(
            "node row has {} fields, expected 6",
            row.len()
        )));
    }
    let lsn_text = row[4].as_text()?;
    let lsn = if lsn_text.is_empty() {
        Lsn::ZERO
    } else {
        Lsn::from_str(&lsn_text)?
    };
    Ok(NodeAddress {
        node_id: row[0].as_integer()?,
        name: row[1].as_text()?,
        host: row[2].as_text()?,
        port: row[3].as_integer()? as u16,
        lsn,
        is_primary: row[5].as_bool()?,
    })
}

fn parse_node_rows(frame: &Frame) -> Result<Vec<NodeAddress>, KeeperError> {
    let Frame::Array(rows) = frame else {
        return Err(KeeperError::Protocol(format!(
            "expected node rows, got {frame:?}"
        )));
    };
    rows.iter().map(parse_node_address).collect()
}

fn expect_command_ok(frame: Frame, proc: &str) -> Result<(), KeeperError> {
    match frame {
        Frame::SimpleString(_) | Frame::Integer(_) | Frame::Null => Ok(()),
        other => Err(KeeperError::Protocol(format!(
            "unexpected reply to '{proc}': {other:?}"
        ))),
    }
}

#[async_trait]
impl MonitorLink for MonitorClient {
    async fn ensure_version_compatibility(&mut self) -> Result<(), KeeperError> {
        let versions = self.get_extension_version().await?;
        let expected = Self::expected_extension_version();
        if versions.installed_version != expected {
            return Err(KeeperError::ExtensionMismatch {
                expected,
                installed: versions.installed_version,
            });
        }
        Ok(())
    }

    async fn register_node(
        &mut self,
        request: &RegistrationRequest,
    ) -> Result<MonitorAssignedState, KeeperError> {
        let args = vec![
            Frame::bulk(&request.formation),
            Frame::bulk(&request.host),
            Frame::Integer(request.port as i64),
            Frame::bulk(&request.dbname),
            Frame::bulk(&request.name),
            Frame::Integer(request.system_identifier as i64),
            Frame::Integer(request.desired_group_id),
            Frame::bulk(request.initial_state.to_string()),
            Frame::bulk(request.kind.to_string()),
            Frame::Integer(request.candidate_priority as i64),
            Frame::Integer(request.replication_quorum as i64),
        ];
        let reply = self.call("register_node", args).await?;
        parse_assigned_state(&reply)
    }

    async fn node_active(
        &mut self,
        report: &NodeReport,
    ) -> Result<MonitorAssignedState, KeeperError> {
        let args = vec![
            Frame::bulk(&report.formation),
            Frame::Integer(report.node_id),
            Frame::Integer(report.group_id),
            Frame::bulk(report.current_state.to_string()),
            Frame::Integer(report.db_is_running as i64),
            Frame::bulk(report.current_lsn.to_string()),
            Frame::bulk(&report.sync_state),
        ];
        let reply = self.call("node_active", args).await?;
        parse_assigned_state(&reply)
    }

    async fn get_nodes(
        &mut self,
        formation: &str,
        group_id: Option<i64>,
    ) -> Result<Vec<NodeAddress>, KeeperError> {
        let mut args = vec![Frame::bulk(formation)];
        if let Some(group_id) = group_id {
            args.push(Frame::Integer(group_id));
        }
        let reply = self.call("get_nodes", args).await?;
        parse_node_rows(&reply)
    }

    async fn get_other_nodes(
        &mut self,
        node_id: i64,
        state: Option<NodeState>,
    ) -> Result<Vec<NodeAddress>, KeeperError> {
        let mut args = vec![Frame::Integer(node_id)];
        if let Some(state) = state {
            args.push(Frame::bulk(state.to_string()));
        }
        let reply = self.call("get_other_nodes", args).await?;
        parse_node_rows(&reply)
    }

    async fn get_primary(
        &mut self,
        formation: &str,
        group_id: i64,
    ) -> Result<NodeAddress, KeeperError> {
        let args = vec![Frame::bulk(formation), Frame::Integer(group_id)];
        let reply = self.call("get_primary", args).await?;
        parse_node_address(&reply)
    }

    async fn get_coordinator(
        &mut self,
        formation: &str,
    ) -> Result<Option<NodeAddress>, KeeperError> {
        let reply = self
            .call("get_coordinator", vec![Frame::bulk(formation)])
            .await?;
        match reply {
            Frame::Null => Ok(None),
            frame => Ok(Some(parse_node_address(&frame)?)),
        }
    }

    async fn get_most_advanced_standby(
        &mut self,
        formation: &str,
        group_id: i64,
    ) -> Result<NodeAddress, KeeperError> {
        let args = vec![Frame::bulk(formation), Frame::Integer(group_id)];
        let reply = self.call("get_most_advanced_standby", args).await?;
        parse_node_address(&reply)
    }

    async fn start_maintenance(&mut self, node_id: i64) -> Result<bool, KeeperError> {
        self.call("start_maintenance", vec![Frame::Integer(node_id)])
            .await?
            .as_bool()
    }

    async fn stop_maintenance(&mut self, node_id: i64) -> Result<bool, KeeperError> {
        self.call("stop_maintenance", vec![Frame::Integer(node_id)])
            .await?
            .as_bool()
    }

    async fn set_candidate_priority(
        &mut self,
        node_id: i64,
        priority: i32,
    ) -> Result<(), KeeperError> {
        let reply = self
            .call(
                "set_node_candidate_priority",
                vec![Frame::Integer(node_id), Frame::Integer(priority as i64)],
            )
            .await?;
        expect_command_ok(reply, "set_node_candidate_priority")
    }

    async fn set_replication_quorum(
        &mut self,
        node_id: i64,
        quorum: bool,
    ) -> Result<(), KeeperError> {
        let reply = self
            .call(
                "set_node_replication_quorum",
                vec![Frame::Integer(node_id), Frame::Integer(quorum as i64)],
            )
            .await?;
        expect_command_ok(reply, "set_node_replication_quorum")
    }

    async fn set_formation_number_sync_standbys(
        &mut self,
        formation: &str,
        count: i32,
    ) -> Result<(), KeeperError> {
        let reply = self
            .call(
                "set_formation_number_sync_standbys",
                vec![Frame::bulk(formation), Frame::Integer(count as i64)],
            )
            .await?;
        expect_command_ok(reply, "set_formation_number_sync_standbys")
    }

    async fn set_node_system_identifier(
        &mut self,
        node_id: i64,
        system_identifier: u64,
    ) -> Result<(), KeeperError> {
        let reply = self
            .call(
                "set_node_system_identifier",
                vec![
                    Frame::Integer(node_id),
                    Frame::Integer(system_identifier as i64),
                ],
            )
            .await?;
        expect_command_ok(reply, "set_node_system_identifier")
    }

    async fn update_node_metadata(
        &mut self,
        node_id: i64,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<(), KeeperError> {
        let reply = self
            .call(
                "update_node_metadata",
                vec![
                    Frame::Integer(node_id),
                    Frame::bulk(name),
                    Frame::bulk(host),
                    Frame::Integer(port as i64),
                ],
            )
            .await?;
        expect_command_ok(reply, "update_node_metadata")
    }

    async fn remove_node(&mut self, host: &str, port: u16) -> Result<(), KeeperError> {
        let reply = self
            .call(
                "remove_node",
                vec![Frame::bulk(host), Frame::Integer(port as i64)],
            )
            .await?;
        expect_command_ok(reply, "remove_node")
    }

    async fn perform_failover(
        &mut self,
        formation: &str,
        group_id: i64,
    ) -> Result<(), KeeperError> {
        let reply = self
            .call(
                "perform_failover",
                vec![Frame::bulk(formation), Frame::Integer(group_id)],
            )
            .await?;
        expect_command_ok(reply, "perform_failover")
    }

    async fn get_extension_version(&mut self) -> Result<ExtensionVersions, KeeperError> {
        let reply = self.call("get_extension_version", vec![]).await?;
        let Frame::Array(row) = reply else {
            return Err(KeeperError::Protocol(format!(
                "expected a version row, got {reply:?}"
            )));
        };
        if row.len() != 2 {
            return Err(KeeperError::Protocol(format!(
                "version row has {} fields, expected 2",
                row.len()
            )));
        }
        Ok(ExtensionVersions {
            default_version: row[0].as_text()?,
            installed_version: row[1].as_text()?,
        })
    }

    async fn begin(&mut self) -> Result<(), KeeperError> {
        let reply = self.call("begin", vec![]).await?;
        expect_command_ok(reply, "begin")
    }

    async fn commit(&mut self) -> Result<(), KeeperError> {
        let reply = self.call("commit", vec![]).await?;
        expect_command_ok(reply, "commit")
    }

    async fn rollback(&mut self) -> Result<(), KeeperError> {
        let reply = self.call("rollback", vec![]).await?;
        expect_command_ok(reply, "rollback")
    }

    async fn listen(&mut self) -> Result<(), KeeperError> {
        if self.listening && self.conn.is_some() {
            return Ok(());
        }
        let reply = self
            .call("listen", vec![Frame::bulk("state"), Frame::bulk("log")])
            .await?;
        expect_command_ok(reply, "listen")?;
        self.listening = true;
        Ok(())
    }

    async fn wait_for_notification(
        &mut self,
        timeout: Duration,
        predicate: NotificationPredicate,
    ) -> Result<Option<StateNotification>, KeeperError> {
        self.listen().await?;
        let deadline = Instant::now() + timeout;

        loop {
            // Drain anything buffered during earlier calls first.
            while let Some(notification) = self.pending.pop_front() {
                match notification {
                    Notification::State(event) => {
                        if predicate(&event) {
                            return Ok(Some(event));
                        }
                        debug!(
                            "Skipping state notification for node {} ({} -> {})",
                            event.node_id, event.current_state, event.goal_state
                        );
                    }
                    Notification::Log(line) => info!("monitor: {line}"),
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match self.next_frame(remaining.min(NOTIFICATION_POLL)).await {
                Ok(frame) => match parse_notification(&frame)? {
                    Some(notification) => self.pending.push_back(notification),
                    None => {
                        warn!("Discarding unexpected frame while waiting for notifications");
                    }
                },
                Err(KeeperError::Timeout(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn disconnect(&mut self) {
        self.conn = None;
        self.listening = false;
    }

    fn reconfigure(&mut self, settings: MonitorSettings) {
        self.settings = settings;
        self.disconnect();
    }
}
