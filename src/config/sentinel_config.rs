//! Sentinel client configuration

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::sentinel::{PreferredReplicas, RetryStrategy, SentinelEndpoint};
use crate::utils::ClientError;

/// Address of a data node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses `host:port` or `[v6]:port`; the port is required
impl FromStr for ServerAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::Config(format!("Invalid address '{}'", s));
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

/// Authentication configuration
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub password: String,
    pub username: Option<String>,
}

impl AuthConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("password", &"***")
            .field("username", &self.username)
            .finish()
    }
}

/// Role the resolved node must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Master,
    Replica,
}

impl Role {
    /// Name as reported in the `role:` line of INFO replication
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" | "primary" => Ok(Role::Master),
            "slave" | "replica" => Ok(Role::Replica),
            _ => Err(ClientError::Config(format!("Unknown role '{}'", s))),
        }
    }
}

/// Options for [`SentinelClient`](crate::sentinel::SentinelClient)
#[derive(Clone)]
pub struct SentinelOptions {
    /// Seed sentinels, tried in order
    pub sentinels: Vec<SentinelEndpoint>,
    /// Master name the sentinels monitor
    pub name: String,
    pub role: Role,
    /// `None` disables retries after every sentinel failed
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub sentinel_auth: Option<AuthConfig>,
    pub node_auth: Option<AuthConfig>,
    /// Add sentinels reported by SENTINEL sentinels to the known set
    pub update_sentinels: bool,
    pub preferred_replicas: Option<PreferredReplicas>,
    /// Wait for `connect()` or the first command before resolving
    pub lazy_connect: bool,
    pub connect_timeout: Duration,
    pub command_timeout: Option<Duration>,
    /// Translation applied to node addresses reported by sentinels
    pub nat_map: HashMap<ServerAddress, ServerAddress>,
}

impl SentinelOptions {
    pub fn new(sentinels: Vec<SentinelEndpoint>, name: impl Into<String>) -> Self {
        Self {
            sentinels,
            name: name.into(),
            role: Role::Master,
            retry_strategy: None,
            sentinel_auth: None,
            node_auth: None,
            update_sentinels: true,
            preferred_replicas: None,
            lazy_connect: false,
            connect_timeout: Duration::from_secs(10),
            command_timeout: None,
            nat_map: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_retry_strategy<S: RetryStrategy + 'static>(mut self, strategy: S) -> Self {
        self.retry_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn with_sentinel_auth(mut self, auth: AuthConfig) -> Self {
        self.sentinel_auth = Some(auth);
        self
    }

    pub fn with_node_auth(mut self, auth: AuthConfig) -> Self {
        self.node_auth = Some(auth);
        self
    }

    pub fn with_update_sentinels(mut self, enabled: bool) -> Self {
        self.update_sentinels = enabled;
        self
    }

    pub fn with_preferred_replicas(mut self, preferred: PreferredReplicas) -> Self {
        self.preferred_replicas = Some(preferred);
        self
    }

    pub fn with_lazy_connect(mut self, lazy: bool) -> Self {
        self.lazy_connect = lazy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn with_nat_mapping(mut self, from: ServerAddress, to: ServerAddress) -> Self {
        self.nat_map.insert(from, to);
        self
    }

    /// Validate option combinations
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.sentinels.is_empty() {
            return Err(ClientError::Config(
                "at least one sentinel is required".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(ClientError::Config("master name is required".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ClientError::Config(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SentinelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelOptions")
            .field("sentinels", &self.sentinels)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("retry_strategy", &self.retry_strategy.is_some())
            .field("sentinel_auth", &self.sentinel_auth)
            .field("node_auth", &self.node_auth)
            .field("update_sentinels", &self.update_sentinels)
            .field("preferred_replicas", &self.preferred_replicas)
            .field("lazy_connect", &self.lazy_connect)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("nat_map", &self.nat_map)
            .finish()
    }
}
