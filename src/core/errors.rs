// src/core/errors.rs

//! Defines the primary error type for the entire keeper.

use std::sync::Arc;
use thiserror::Error;

use crate::core::fsm::NodeState;

/// The main error enum, representing all possible failures within the keeper.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Monitor error [{code}]: {message}")]
    Monitor { code: String, message: String },

    #[error("Monitor extension version mismatch: keeper expects {expected}, monitor runs {installed}")]
    ExtensionMismatch { expected: String, installed: String },

    #[error(
        "System identifier mismatch: state file has {cached}, local database reports {reported}"
    )]
    IdentityMismatch { cached: u64, reported: u64 },

    #[error("Node id changed: state file has {cached}, monitor assigned {assigned}")]
    NodeIdChanged { cached: i64, assigned: i64 },

    #[error("Database port changed: configured {configured}, pid file reports {reported}")]
    PortChanged { configured: u16, reported: u16 },

    #[error("State file error: {0}")]
    StateFile(String),

    #[error("PID file error: {0}")]
    PidFile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("No transition from {from} to {to}")]
    NoTransition { from: NodeState, to: NodeState },

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Asked to stop")]
    AskedToStop,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a monitor-reported error code should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorErrorClass {
    /// A transient condition; retry per the active retry policy.
    Retryable,
    /// Another standby is registering; retry with backoff during registration only.
    ObjectInUse,
    /// A node exists in this group with a different system identifier. Data
    /// safety issue requiring operator action.
    ExclusionViolation,
    /// Surface to the caller.
    Other,
}

/// Classifies a five-character monitor error class code.
pub fn classify_monitor_code(code: &str) -> MonitorErrorClass {
    match code {
        // serialization failure, statement-completion-unknown, deadlock
        "40001" | "40003" | "40P01" => MonitorErrorClass::Retryable,
        "55006" => MonitorErrorClass::ObjectInUse,
        "23P01" => MonitorErrorClass::ExclusionViolation,
        // insufficient-resources and program-limit-exceeded classes
        _ if code.starts_with("53") || code.starts_with("54") => MonitorErrorClass::Retryable,
        _ => MonitorErrorClass::Other,
    }
}

impl KeeperError {
    /// Whether this failure is worth retrying under an active retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeeperError::Io(_)
            | KeeperError::IncompleteData
            | KeeperError::ConnectionClosed
            | KeeperError::Timeout(_) => true,
            KeeperError::Monitor { code, .. } => {
                classify_monitor_code(code) == MonitorErrorClass::Retryable
            }
            _ => false,
        }
    }

    /// Whether the monitor rejected the call because another node holds the
    /// registration lock.
    pub fn is_object_in_use(&self) -> bool {
        matches!(self, KeeperError::Monitor { code, .. }
            if classify_monitor_code(code) == MonitorErrorClass::ObjectInUse)
    }

    /// Whether the monitor detected a conflicting system identifier in the group.
    pub fn is_exclusion_violation(&self) -> bool {
        matches!(self, KeeperError::Monitor { code, .. }
            if classify_monitor_code(code) == MonitorErrorClass::ExclusionViolation)
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for KeeperError {
    fn clone(&self) -> Self {
        match self {
            KeeperError::Io(e) => KeeperError::Io(Arc::clone(e)),
            KeeperError::IncompleteData => KeeperError::IncompleteData,
            KeeperError::Protocol(s) => KeeperError::Protocol(s.clone()),
            KeeperError::ConnectionClosed => KeeperError::ConnectionClosed,
            KeeperError::Timeout(s) => KeeperError::Timeout(s.clone()),
            KeeperError::Monitor { code, message } => KeeperError::Monitor {
                code: code.clone(),
                message: message.clone(),
            },
            KeeperError::ExtensionMismatch {
                expected,
                installed,
            } => KeeperError::ExtensionMismatch {
                expected: expected.clone(),
                installed: installed.clone(),
            },
            KeeperError::IdentityMismatch { cached, reported } => KeeperError::IdentityMismatch {
                cached: *cached,
                reported: *reported,
            },
            KeeperError::NodeIdChanged { cached, assigned } => KeeperError::NodeIdChanged {
                cached: *cached,
                assigned: *assigned,
            },
            KeeperError::PortChanged {
                configured,
                reported,
            } => KeeperError::PortChanged {
                configured: *configured,
                reported: *reported,
            },
            KeeperError::StateFile(s) => KeeperError::StateFile(s.clone()),
            KeeperError::PidFile(s) => KeeperError::PidFile(s.clone()),
            KeeperError::Config(s) => KeeperError::Config(s.clone()),
            KeeperError::Controller(s) => KeeperError::Controller(s.clone()),
            KeeperError::NoTransition { from, to } => KeeperError::NoTransition {
                from: *from,
                to: *to,
            },
            KeeperError::Registration(s) => KeeperError::Registration(s.clone()),
            KeeperError::AskedToStop => KeeperError::AskedToStop,
            KeeperError::Internal(s) => KeeperError::Internal(s.clone()),
        }
    }
}

impl PartialEq for KeeperError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeeperError::Io(e1), KeeperError::Io(e2)) => e1.to_string() == e2.to_string(),
            (KeeperError::Protocol(s1), KeeperError::Protocol(s2)) => s1 == s2,
            (KeeperError::Timeout(s1), KeeperError::Timeout(s2)) => s1 == s2,
            (
                KeeperError::Monitor {
                    code: c1,
                    message: m1,
                },
                KeeperError::Monitor {
                    code: c2,
                    message: m2,
                },
            ) => c1 == c2 && m1 == m2,
            (KeeperError::StateFile(s1), KeeperError::StateFile(s2)) => s1 == s2,
            (KeeperError::PidFile(s1), KeeperError::PidFile(s2)) => s1 == s2,
            (KeeperError::Config(s1), KeeperError::Config(s2)) => s1 == s2,
            (KeeperError::Controller(s1), KeeperError::Controller(s2)) => s1 == s2,
            (KeeperError::Registration(s1), KeeperError::Registration(s2)) => s1 == s2,
            (KeeperError::Internal(s1), KeeperError::Internal(s2)) => s1 == s2,
            (
                KeeperError::NoTransition { from: f1, to: t1 },
                KeeperError::NoTransition { from: f2, to: t2 },
            ) => f1 == f2 && t1 == t2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for KeeperError {
    fn from(e: std::io::Error) -> Self {
        KeeperError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for KeeperError {
    fn from(e: std::str::Utf8Error) -> Self {
        KeeperError::Protocol(format!("invalid UTF-8 in frame: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for KeeperError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        KeeperError::Protocol(format!("invalid UTF-8 in frame: {e}"))
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(e: serde_json::Error) -> Self {
        KeeperError::Protocol(format!("JSON payload error: {e}"))
    }
}

impl From<url::ParseError> for KeeperError {
    fn from(e: url::ParseError) -> Self {
        KeeperError::Config(format!("invalid monitor URI: {e}"))
    }
}
