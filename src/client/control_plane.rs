//! Control Plane trait for server communication
//!
//! Abstracts the non-application traffic the resolver sends: INFO and the
//! SENTINEL discovery commands. Higher-level helpers
//! live on [`ControlPlaneExt`] and are available to every implementation.

use std::collections::HashMap;
use std::future::Future;

use tracing::debug;

use crate::client::RawConnection;
use crate::config::ServerAddress;
use crate::sentinel::{ReplicaRecord, SentinelEndpoint};
use crate::utils::{ConnectionError, ProtocolError, ResolveError, RespValue};

/// Control plane operations trait
pub trait ControlPlane: Send {
    /// Execute a command with string arguments
    fn execute_args(
        &mut self,
        args: &[&str],
    ) -> impl Future<Output = Result<RespValue, ConnectionError>> + Send;
}

impl ControlPlane for RawConnection {
    async fn execute_args(&mut self, args: &[&str]) -> Result<RespValue, ConnectionError> {
        self.execute(args).await
    }
}

/// Extension trait with common control plane operations
pub trait ControlPlaneExt: ControlPlane {
    /// Get INFO for a section (empty string returns the default sections)
    fn info(
        &mut self,
        section: &str,
    ) -> impl Future<Output = Result<String, ConnectionError>> + Send {
        fetch_info(self, section)
    }

    /// SENTINEL get-master-addr-by-name
    ///
    /// `Ok(None)` means the sentinel had no usable answer.
    fn sentinel_master_address(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Option<ServerAddress>, ResolveError>> + Send {
        fetch_master_address(self, name)
    }

    /// SENTINEL slaves: replicas of the named master
    fn sentinel_replicas(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<ReplicaRecord>, ResolveError>> + Send {
        fetch_replicas(self, name)
    }

    /// SENTINEL sentinels: the other sentinels monitoring the named master
    fn sentinel_peers(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<SentinelEndpoint>, ResolveError>> + Send {
        fetch_peers(self, name)
    }
}

impl<T: ControlPlane> ControlPlaneExt for T {}

async fn fetch_info<C: ControlPlane + ?Sized>(
    conn: &mut C,
    section: &str,
) -> Result<String, ConnectionError> {
    let response = if section.is_empty() {
        conn.execute_args(&["INFO"]).await?
    } else {
        conn.execute_args(&["INFO", section]).await?
    };

    match response {
        RespValue::BulkString(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
        RespValue::SimpleString(s) => Ok(s),
        RespValue::Error(e) => Err(ProtocolError::ServerError(e).into()),
        other => Err(ProtocolError::UnexpectedResponse {
            expected: "INFO text".to_string(),
            actual: other.kind().to_string(),
        }
        .into()),
    }
}

async fn fetch_master_address<C: ControlPlane + ?Sized>(
    conn: &mut C,
    name: &str,
) -> Result<Option<ServerAddress>, ResolveError> {
    let response = conn
        .execute_args(&["SENTINEL", "get-master-addr-by-name", name])
        .await?;

    match response {
        RespValue::Error(e) => Err(ResolveError::Sentinel(e)),
        RespValue::Array(items) => match items.as_slice() {
            [host, port] => {
                let host = host.as_str().filter(|h| !h.is_empty());
                let port = port.as_str().and_then(|p| p.parse::<u16>().ok());
                Ok(host.zip(port).map(|(h, p)| ServerAddress::new(h, p)))
            }
            _ => Ok(None),
        },
        other => {
            debug!("get-master-addr-by-name returned {}", other.kind());
            Ok(None)
        }
    }
}

async fn fetch_replicas<C: ControlPlane + ?Sized>(
    conn: &mut C,
    name: &str,
) -> Result<Vec<ReplicaRecord>, ResolveError> {
    match conn.execute_args(&["SENTINEL", "slaves", name]).await? {
        RespValue::Error(e) => Err(ResolveError::Sentinel(e)),
        RespValue::Array(entries) => Ok(entries
            .iter()
            .filter_map(|entry| ReplicaRecord::from_fields(&parse_flat_map(entry)))
            .collect()),
        _ => Ok(Vec::new()),
    }
}

async fn fetch_peers<C: ControlPlane + ?Sized>(
    conn: &mut C,
    name: &str,
) -> Result<Vec<SentinelEndpoint>, ResolveError> {
    match conn.execute_args(&["SENTINEL", "sentinels", name]).await? {
        RespValue::Error(e) => Err(ResolveError::Sentinel(e)),
        RespValue::Array(entries) => Ok(entries
            .iter()
            .filter_map(|entry| SentinelEndpoint::from_fields(&parse_flat_map(entry)))
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// Parse a flat `[key, value, key, value, ...]` array as sentinels return it
pub fn parse_flat_map(entry: &RespValue) -> HashMap<&str, &str> {
    let mut fields = HashMap::new();
    if let Some(items) = entry.as_array() {
        for pair in items.chunks_exact(2) {
            if let (Some(key), Some(value)) = (pair[0].as_str(), pair[1].as_str()) {
                fields.insert(key, value);
            }
        }
    }
    fields
}
