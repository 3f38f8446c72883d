//! valkey-sentinel-client library
//!
//! Sentinel-aware connection management for Valkey: resolves the current
//! master (or a replica) through a set of sentinels, verifies its role and
//! follows failovers without losing queued commands.

pub mod cli_mode;
pub mod client;
pub mod config;
pub mod sentinel;
pub mod utils;

pub use config::{AuthConfig, Role, SentinelOptions, ServerAddress};
pub use sentinel::{
    default_retry_strategy, ClientEvent, ConnectionState, PreferredReplica, PreferredReplicas,
    ReplicaRecord, ReplicaSelector, RetryStrategy, SentinelClient, SentinelEndpoint,
};
pub use utils::{ClientError, RespValue, Result};
