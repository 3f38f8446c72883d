//! One resolution pass over the known sentinels
//!
//! Sentinels are tried strictly one at a time in set order. Each sentinel
//! is asked for the target address, the answer is translated through the
//! NAT map, and the candidate is handed to the [`RoleVerifier`]. The first
//! verified candidate ends the pass.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::{ConnectionFactory, ControlPlaneExt, RawConnection};
use crate::config::{Role, SentinelOptions, ServerAddress};
use crate::sentinel::endpoint::{EndpointSet, SentinelEndpoint};
use crate::sentinel::replica::{select_replica, PreferredReplicas};
use crate::sentinel::retry::RetryState;
use crate::sentinel::status::{ClientEvent, ConnectionState, SharedStatus};
use crate::sentinel::verifier::RoleVerifier;
use crate::utils::ResolveError;

/// Result of [`SentinelResolver::run_cycle`]
pub enum CycleOutcome {
    /// A verified connection to the target node
    Connected {
        conn: RawConnection,
        address: ServerAddress,
    },
    /// Every known sentinel failed; the last error is in the retry state
    Exhausted,
}

/// Walks the endpoint set looking for the target node
pub struct SentinelResolver {
    name: String,
    role: Role,
    endpoints: EndpointSet,
    sentinel_factory: ConnectionFactory,
    verifier: RoleVerifier,
    preferred: Option<PreferredReplicas>,
    nat_map: HashMap<ServerAddress, ServerAddress>,
    status: SharedStatus,
    events: broadcast::Sender<ClientEvent>,
}

impl SentinelResolver {
    pub fn new(
        options: &SentinelOptions,
        status: SharedStatus,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let sentinel_factory = ConnectionFactory {
            connect_timeout: options.connect_timeout,
            read_timeout: options.command_timeout,
            auth: options.sentinel_auth.clone(),
        };
        let node_factory = ConnectionFactory {
            connect_timeout: options.connect_timeout,
            read_timeout: options.command_timeout,
            auth: None,
        };

        Self {
            name: options.name.clone(),
            role: options.role,
            endpoints: EndpointSet::new(options.sentinels.iter().cloned(), options.update_sentinels),
            sentinel_factory,
            verifier: RoleVerifier::new(node_factory, options.node_auth.clone(), options.role),
            preferred: options.preferred_replicas.clone(),
            nat_map: options.nat_map.clone(),
            status,
            events,
        }
    }

    /// Sentinels currently known, seeds first
    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Run one pass from the first sentinel
    ///
    /// Per-endpoint failures never abort the pass. They are recorded in
    /// `retry`, except empty answers which leave an earlier error in place.
    /// Dropping the returned future aborts the in-flight step.
    pub async fn run_cycle(&mut self, retry: &mut RetryState) -> CycleOutcome {
        let mut cursor = self.endpoints.cursor();

        while let Some(endpoint) = cursor.next(&self.endpoints) {
            self.status.set_step(ConnectionState::ResolvingCandidate);
            debug!(
                "Asking sentinel {} for {} of '{}'",
                endpoint,
                self.role,
                self.name
            );

            match self.try_endpoint(&endpoint).await {
                Ok((conn, address)) => {
                    info!("Sentinel {} resolved {} {}", endpoint, self.role, address);
                    return CycleOutcome::Connected { conn, address };
                }
                Err(e) if e.is_empty_answer() => {
                    debug!("{}", e);
                }
                Err(e) => {
                    warn!("Sentinel {} failed: {}", endpoint, e);
                    retry.record_error(e);
                }
            }
        }

        CycleOutcome::Exhausted
    }

    async fn try_endpoint(
        &mut self,
        endpoint: &SentinelEndpoint,
    ) -> Result<(RawConnection, ServerAddress), ResolveError> {
        let mut sentinel = self
            .sentinel_factory
            .create(&endpoint.host, endpoint.port)
            .await?;

        let candidate = self.discover(&mut sentinel, endpoint).await?;

        if self.endpoints.update_enabled() {
            self.refresh_sentinels(&mut sentinel, endpoint).await;
        }
        drop(sentinel);

        let address = self.translate(candidate);
        let conn = self.verifier.verify(&address, &self.status).await?;
        Ok((conn, address))
    }

    async fn discover(
        &self,
        sentinel: &mut RawConnection,
        endpoint: &SentinelEndpoint,
    ) -> Result<ServerAddress, ResolveError> {
        match self.role {
            Role::Master => sentinel
                .sentinel_master_address(&self.name)
                .await?
                .ok_or_else(|| ResolveError::DiscoveryEmpty {
                    sentinel: endpoint.to_string(),
                    role: "master",
                    name: self.name.clone(),
                }),
            Role::Replica => {
                let replicas = sentinel.sentinel_replicas(&self.name).await?;
                if replicas.is_empty() {
                    return Err(ResolveError::DiscoveryEmpty {
                        sentinel: endpoint.to_string(),
                        role: "replica",
                        name: self.name.clone(),
                    });
                }
                select_replica(&replicas, self.preferred.as_ref())
                    .map(|r| r.address())
                    .ok_or_else(|| ResolveError::NoReplicaSelected {
                        sentinel: endpoint.to_string(),
                    })
            }
        }
    }

    /// Merge the sentinel's peers into the set; failures are only logged
    async fn refresh_sentinels(&mut self, sentinel: &mut RawConnection, current: &SentinelEndpoint) {
        let peers = match sentinel.sentinel_peers(&self.name).await {
            Ok(peers) => peers,
            Err(e) => {
                debug!("SENTINEL sentinels on {} failed: {}", current, e);
                return;
            }
        };

        let added = self
            .endpoints
            .merge(peers.into_iter().filter(|peer| peer != current));
        if added.is_empty() {
            return;
        }

        info!(
            "Discovered {} new sentinel(s) through {}",
            added.len(),
            current
        );
        let known = self.endpoints.as_slice().to_vec();
        self.status.set_sentinels(known.clone());
        let _ = self.events.send(ClientEvent::SentinelsUpdated(known));
    }

    fn translate(&self, address: ServerAddress) -> ServerAddress {
        match self.nat_map.get(&address) {
            Some(mapped) => {
                debug!("NAT map {} -> {}", address, mapped);
                mapped.clone()
            }
            None => address,
        }
    }
}
