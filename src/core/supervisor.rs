// src/core/supervisor.rs

//! The process-tree manager.
//!
//! The supervisor is the parent process of two permanent children: the
//! database controller (an external command from the configuration) and this
//! same binary re-executed as the `node-active` service. Children are
//! restarted whenever they exit, with a jittered exponential backoff; the
//! monitor-incompatibility exit code restarts immediately, and the executable
//! path is re-resolved on every spawn so an upgraded binary takes over.
//! Signals received by the supervisor are forwarded to both children.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::exit::EXIT_MONITOR_INCOMPATIBLE;

const INITIAL_RESTART_DELAY: Duration = Duration::from_secs(1);
const MAX_RESTART_DELAY: Duration = Duration::from_secs(30);
/// A child that survived this long gets its backoff reset.
const STABLE_RUN: Duration = Duration::from_secs(60);

/// Which supervised child a spec describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ChildKind {
    Controller,
    NodeActive,
}

impl ChildKind {
    fn name(self) -> &'static str {
        match self {
            ChildKind::Controller => "database controller",
            ChildKind::NodeActive => "node-active service",
        }
    }
}

type ChildPids = Arc<Mutex<HashMap<ChildKind, u32>>>;

/// Runs the supervisor until a stop signal arrives and both children exited.
pub async fn run(config_path: String, config: Config) -> Result<()> {
    info!(
        "Supervisor starting for node '{}' (pid {})",
        config.node.name,
        std::process::id()
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let pids: ChildPids = Arc::new(Mutex::new(HashMap::new()));

    spawn_signal_forwarder(pids.clone(), shutdown_tx.clone());

    let mut children: JoinSet<Result<()>> = JoinSet::new();
    children.spawn(supervise_child(
        ChildKind::Controller,
        config_path.clone(),
        config.clone(),
        pids.clone(),
        shutdown_tx.subscribe(),
    ));
    children.spawn(supervise_child(
        ChildKind::NodeActive,
        config_path,
        config,
        pids,
        shutdown_tx.subscribe(),
    ));

    while let Some(res) = children.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("A supervised child failed permanently: {e}"),
            Err(e) => error!("A supervision task panicked: {e:?}"),
        }
    }

    info!("Supervisor stopped.");
    Ok(())
}

/// Forwards stop and reload signals to both children, and tells the
/// supervision loops to stop respawning.
fn spawn_signal_forwarder(pids: ChildPids, shutdown_tx: broadcast::Sender<()>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sighup = signal(SignalKind::hangup()).expect("Failed to create SIGHUP stream");

    tokio::spawn(async move {
        loop {
            let (stop, forwarded) = tokio::select! {
                _ = sigterm.recv() => (true, libc::SIGTERM),
                _ = sigint.recv() => (true, libc::SIGINT),
                _ = sighup.recv() => (false, libc::SIGHUP),
            };
            let targets: Vec<(ChildKind, u32)> =
                pids.lock().iter().map(|(k, pid)| (*k, *pid)).collect();
            for (kind, pid) in targets {
                info!("Forwarding signal {forwarded} to the {} (pid {pid})", kind.name());
                unsafe {
                    libc::kill(pid as i32, forwarded);
                }
            }
            if stop {
                let _ = shutdown_tx.send(());
            }
        }
    });
}

/// Builds the command for one child. Resolved fresh on every spawn so a
/// binary upgrade on disk takes effect at the next restart.
fn child_command(kind: ChildKind, config_path: &str, config: &Config) -> Result<tokio::process::Command> {
    let mut command = match kind {
        ChildKind::Controller => {
            let argv = &config.controller.command;
            let mut command = tokio::process::Command::new(&argv[0]);
            command.args(&argv[1..]);
            command
        }
        ChildKind::NodeActive => {
            let exe = std::env::current_exe()
                .map_err(|e| anyhow!("cannot resolve our own executable: {e}"))?;
            let mut command = tokio::process::Command::new(exe);
            command.args(["--service", "node-active", "--config", config_path]);
            command
        }
    };
    command.kill_on_drop(true);
    Ok(command)
}

/// The permanent-restart loop for one child.
async fn supervise_child(
    kind: ChildKind,
    config_path: String,
    config: Config,
    pids: ChildPids,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let mut delay = INITIAL_RESTART_DELAY;

    loop {
        let mut child = match child_command(kind, &config_path, &config)?.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn the {}: {e}", kind.name());
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RESTART_DELAY);
                continue;
            }
        };
        let started = Instant::now();
        if let Some(pid) = child.id() {
            info!("Started the {} (pid {pid})", kind.name());
            pids.lock().insert(kind, pid);
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = shutdown_rx.recv() => {
                // The forwarder already signalled the child; wait it out.
                let status = child.wait().await?;
                pids.lock().remove(&kind);
                info!("The {} exited with {status} during shutdown.", kind.name());
                return Ok(());
            }
        };
        pids.lock().remove(&kind);

        if status.code() == Some(EXIT_MONITOR_INCOMPATIBLE) {
            warn!(
                "The {} reports a monitor extension version mismatch; \
                 re-executing immediately to pick up an upgraded binary.",
                kind.name()
            );
            delay = INITIAL_RESTART_DELAY;
            continue;
        }

        if started.elapsed() >= STABLE_RUN {
            delay = INITIAL_RESTART_DELAY;
        }

        // Jitter avoids both children hammering a broken dependency in
        // lockstep after a crash loop.
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
        let wait_time = delay + jitter;
        warn!(
            "The {} exited with {status}; restarting in {wait_time:?}",
            kind.name()
        );

        tokio::select! {
            _ = tokio::time::sleep(wait_time) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested; not restarting the {}.", kind.name());
                return Ok(());
            }
        }
        delay = (delay * 2).min(MAX_RESTART_DELAY);
    }
}
