//! Sentinel endpoints and the ordered endpoint set

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::ClientError;

/// Port sentinels listen on when none is given
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Address of one sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SentinelEndpoint {
    pub host: String,
    pub port: u16,
}

impl SentinelEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the default sentinel port
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_SENTINEL_PORT)
    }

    /// Build from the `ip`/`port` fields of a SENTINEL sentinels entry
    pub fn from_fields(fields: &HashMap<&str, &str>) -> Option<Self> {
        let ip = fields.get("ip").filter(|ip| !ip.is_empty())?;
        let port = fields.get("port")?.parse().ok()?;
        Some(Self::new(*ip, port))
    }
}

impl fmt::Display for SentinelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses `host`, `host:port`, `[v6]` or `[v6]:port`
impl FromStr for SentinelEndpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ClientError::Config(format!("Invalid sentinel address '{}'", s));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else {
            match s.rsplit_once(':') {
                // A bare IPv6 literal has more than one colon and no port
                Some((host, _)) if host.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_SENTINEL_PORT,
        };

        Ok(Self::new(host, port))
    }
}

/// Ordered, duplicate-free set of known sentinels
///
/// Insertion order is connection priority. Discovered sentinels are only
/// ever appended, and only when updates are enabled.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    endpoints: Vec<SentinelEndpoint>,
    update_enabled: bool,
}

impl EndpointSet {
    /// Create from seed endpoints, dropping repeated entries
    pub fn new(seeds: impl IntoIterator<Item = SentinelEndpoint>, update_enabled: bool) -> Self {
        let mut endpoints: Vec<SentinelEndpoint> = Vec::new();
        for seed in seeds {
            if !endpoints.contains(&seed) {
                endpoints.push(seed);
            }
        }
        Self {
            endpoints,
            update_enabled,
        }
    }

    /// A cursor positioned at the first endpoint
    pub fn cursor(&self) -> EndpointCursor {
        EndpointCursor { next: 0 }
    }

    /// Append endpoints not yet known; returns the ones that were added.
    ///
    /// No-op when updates are disabled.
    pub fn merge(
        &mut self,
        discovered: impl IntoIterator<Item = SentinelEndpoint>,
    ) -> Vec<SentinelEndpoint> {
        if !self.update_enabled {
            return Vec::new();
        }

        let mut added = Vec::new();
        for endpoint in discovered {
            if !self.endpoints.contains(&endpoint) {
                self.endpoints.push(endpoint.clone());
                added.push(endpoint);
            }
        }
        added
    }

    pub fn update_enabled(&self) -> bool {
        self.update_enabled
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn as_slice(&self) -> &[SentinelEndpoint] {
        &self.endpoints
    }
}

/// Position within one pass over an [`EndpointSet`]
///
/// Reads the live set on every step, so endpoints merged mid-pass are
/// visited by the same pass.
#[derive(Debug)]
pub struct EndpointCursor {
    next: usize,
}

impl EndpointCursor {
    pub fn next(&mut self, set: &EndpointSet) -> Option<SentinelEndpoint> {
        let endpoint = set.endpoints.get(self.next)?.clone();
        self.next += 1;
        Some(endpoint)
    }
}
