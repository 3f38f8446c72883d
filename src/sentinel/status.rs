//! Connection state, client events and the status snapshot shared with handles

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ServerAddress;
use crate::sentinel::SentinelEndpoint;
use crate::utils::ClientError;

/// Lifecycle of a sentinel-managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    ResolvingCandidate,
    VerifyingRole,
    Authenticating,
    Connected,
    Reconnecting,
    /// Every sentinel failed and retries are exhausted
    Failed,
    /// Closed by the caller
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::ResolvingCandidate => "resolving",
            ConnectionState::VerifyingRole => "verifying-role",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications published on the client's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// First resolution started
    Connecting,
    Connected(ServerAddress),
    /// The data connection was lost and resolution restarted
    Reconnecting,
    /// The known sentinel set grew; carries the full set
    SentinelsUpdated(Vec<SentinelEndpoint>),
    Error(ClientError),
    /// The client finished; fired once
    End,
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    address: Option<ServerAddress>,
    sentinels: Vec<SentinelEndpoint>,
    terminal_error: Option<ClientError>,
}

/// Read-mostly snapshot written by the client task
#[derive(Debug, Clone)]
pub struct SharedStatus {
    inner: Arc<RwLock<Status>>,
}

impl SharedStatus {
    pub fn new(state: ConnectionState, sentinels: Vec<SentinelEndpoint>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Status {
                state,
                address: None,
                sentinels,
                terminal_error: None,
            })),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut status = self.inner.write();
        if state != ConnectionState::Connected {
            status.address = None;
        }
        status.state = state;
    }

    /// Record a resolution step
    ///
    /// A reconnect leg keeps reporting `Reconnecting` until it ends.
    pub fn set_step(&self, state: ConnectionState) {
        let mut status = self.inner.write();
        status.address = None;
        if status.state != ConnectionState::Reconnecting {
            status.state = state;
        }
    }

    pub fn set_connected(&self, address: ServerAddress) {
        let mut status = self.inner.write();
        status.state = ConnectionState::Connected;
        status.address = Some(address);
    }

    pub fn address(&self) -> Option<ServerAddress> {
        self.inner.read().address.clone()
    }

    pub fn sentinels(&self) -> Vec<SentinelEndpoint> {
        self.inner.read().sentinels.clone()
    }

    pub fn set_sentinels(&self, sentinels: Vec<SentinelEndpoint>) {
        self.inner.write().sentinels = sentinels;
    }

    /// Enter a terminal state
    pub fn finish(&self, state: ConnectionState, error: ClientError) {
        let mut status = self.inner.write();
        status.state = state;
        status.address = None;
        status.terminal_error = Some(error);
    }

    /// Error handed to requests made after the client finished
    pub fn terminal_error(&self) -> ClientError {
        self.inner
            .read()
            .terminal_error
            .clone()
            .unwrap_or(ClientError::Closed)
    }
}
