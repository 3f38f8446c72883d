//! Error types for valkey-sentinel-client

use std::io;
use thiserror::Error;

/// Client-facing error
///
/// This is the only error type handed back to application code. It is
/// `Clone` so that one terminal failure can be delivered to every queued
/// command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("All sentinels are unreachable and retry is disabled. Last error: {last_error}")]
    AllSentinelsUnreachable { last_error: String },

    #[error("Connection is closed")]
    Closed,

    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Connection closed unexpectedly")]
    Closed,

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// RESP protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid RESP type byte: {0}")]
    InvalidType(u8),

    #[error("Invalid bulk string length: {0}")]
    InvalidLength(i64),

    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Per-endpoint resolution failure
///
/// Kept internal. Failures other than an empty answer are recorded as the
/// last error of a resolution cycle and reach callers only through
/// [`ClientError::AllSentinelsUnreachable`].
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Transport(#[from] ConnectionError),

    /// Error reply from a sentinel, kept verbatim
    #[error("{0}")]
    Sentinel(String),

    #[error("sentinel {sentinel} has no {role} address for '{name}'")]
    DiscoveryEmpty {
        sentinel: String,
        role: &'static str,
        name: String,
    },

    #[error("sentinel {sentinel} reported no acceptable replica")]
    NoReplicaSelected { sentinel: String },

    #[error("node {address} has role {actual}, expected {expected}")]
    RoleMismatch {
        address: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl ResolveError {
    /// The sentinel answered but had nothing usable for the target
    pub fn is_empty_answer(&self) -> bool {
        matches!(
            self,
            ResolveError::DiscoveryEmpty { .. } | ResolveError::NoReplicaSelected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
