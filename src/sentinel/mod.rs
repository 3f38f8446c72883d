//! Sentinel resolution and failover
//!
//! [`SentinelClient`] is the entry point. The remaining types are exposed
//! for callers that want to drive resolution themselves or plug in their
//! own replica selection and retry policies.

pub mod client;
pub mod endpoint;
pub mod replica;
pub mod resolver;
pub mod retry;
pub mod status;
pub mod verifier;

pub use client::SentinelClient;
pub use endpoint::{EndpointCursor, EndpointSet, SentinelEndpoint, DEFAULT_SENTINEL_PORT};
pub use replica::{select_replica, PreferredReplica, PreferredReplicas, ReplicaRecord, ReplicaSelector};
pub use resolver::{CycleOutcome, SentinelResolver};
pub use retry::{default_retry_strategy, RetryController, RetryDecision, RetryState, RetryStrategy};
pub use status::{ClientEvent, ConnectionState, SharedStatus};
pub use verifier::RoleVerifier;
