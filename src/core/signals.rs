// src/core/signals.rs

//! Process-wide signal flags.
//!
//! Signal handlers only flip atomics; the control loop consults them at
//! defined safe points, never in the middle of a state-file write or a
//! monitor transaction. Reload is honored only at the start of an iteration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Default)]
struct SignalFlags {
    stop: AtomicBool,
    fast_stop: AtomicBool,
    reload: AtomicBool,
}

/// A cloneable handle on the process's signal flags. Sleeps in the control
/// loop wait on `notified()` so a signal wakes them immediately.
#[derive(Debug, Clone, Default)]
pub struct SignalHandle {
    flags: Arc<SignalFlags>,
    notify: Arc<Notify>,
}

impl SignalHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graceful or fast stop was requested.
    pub fn asked_to_stop(&self) -> bool {
        self.flags.stop.load(Ordering::SeqCst) || self.flags.fast_stop.load(Ordering::SeqCst)
    }

    /// Fast stop: exit without finishing the iteration.
    pub fn fast_stop(&self) -> bool {
        self.flags.fast_stop.load(Ordering::SeqCst)
    }

    /// Consumes a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.flags.reload.swap(false, Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn request_fast_stop(&self) {
        self.flags.fast_stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn request_reload(&self) {
        self.flags.reload.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Sleeps up to `duration`, waking early on any signal.
    pub async fn sleep(&self, duration: std::time::Duration) {
        let _ = tokio::time::timeout(duration, self.notify.notified()).await;
    }
}

/// Installs the unix signal handlers: SIGTERM = graceful stop, SIGINT and
/// SIGQUIT = fast stop, SIGHUP = reload.
pub fn install(handle: SignalHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sigquit = signal(SignalKind::quit()).expect("Failed to create SIGQUIT stream");
    let mut sighup = signal(SignalKind::hangup()).expect("Failed to create SIGHUP stream");

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, initiating graceful stop.");
                    handle.request_stop();
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, initiating fast stop.");
                    handle.request_fast_stop();
                }
                _ = sigquit.recv() => {
                    info!("SIGQUIT received, initiating fast stop.");
                    handle.request_fast_stop();
                }
                _ = sighup.recv() => {
                    info!("SIGHUP received, scheduling configuration reload.");
                    handle.request_reload();
                }
            }
        }
    });
}
