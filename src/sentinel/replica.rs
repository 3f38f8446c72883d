//! Replica records and preferred-replica selection

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ServerAddress;

/// Flags that mark a replica as unusable
const DOWN_FLAGS: [&str; 3] = ["s_down", "o_down", "disconnected"];

/// One entry of a SENTINEL slaves reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRecord {
    pub ip: String,
    pub port: u16,
    pub flags: Vec<String>,
}

impl ReplicaRecord {
    /// Build from the flat field map of a SENTINEL slaves entry
    ///
    /// Entries without an address are skipped by returning `None`.
    pub fn from_fields(fields: &HashMap<&str, &str>) -> Option<Self> {
        let ip = fields.get("ip").filter(|ip| !ip.is_empty())?;
        let port = fields.get("port")?.parse().ok()?;
        let flags = fields
            .get("flags")
            .map(|f| {
                f.split(',')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            ip: ip.to_string(),
            port,
            flags,
        })
    }

    /// Check if the sentinel considers this replica reachable
    pub fn is_available(&self) -> bool {
        !self.flags.iter().any(|f| DOWN_FLAGS.contains(&f.as_str()))
    }

    pub fn address(&self) -> ServerAddress {
        ServerAddress::new(self.ip.clone(), self.port)
    }
}

/// Static preference entry; lower priority wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredReplica {
    pub ip: String,
    pub port: u16,
    pub priority: Option<u32>,
}

impl PreferredReplica {
    pub fn new(ip: impl Into<String>, port: u16, priority: Option<u32>) -> Self {
        Self {
            ip: ip.into(),
            port,
            priority,
        }
    }

    fn matches(&self, record: &ReplicaRecord) -> bool {
        self.ip == record.ip && self.port == record.port
    }
}

/// Caller-supplied replica choice
///
/// Receives only available replicas, in the order the sentinel reported
/// them. Returning `None` rejects every replica this sentinel offered.
pub trait ReplicaSelector: Send + Sync {
    fn select(&self, candidates: &[ReplicaRecord]) -> Option<ReplicaRecord>;
}

impl<F> ReplicaSelector for F
where
    F: Fn(&[ReplicaRecord]) -> Option<ReplicaRecord> + Send + Sync,
{
    fn select(&self, candidates: &[ReplicaRecord]) -> Option<ReplicaRecord> {
        self(candidates)
    }
}

/// Replica preference policy
#[derive(Clone)]
pub enum PreferredReplicas {
    /// Static list matched by ip and port
    Priority(Vec<PreferredReplica>),
    /// Selector function
    Selector(Arc<dyn ReplicaSelector>),
}

impl PreferredReplicas {
    pub fn selector<S: ReplicaSelector + 'static>(selector: S) -> Self {
        PreferredReplicas::Selector(Arc::new(selector))
    }
}

impl fmt::Debug for PreferredReplicas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferredReplicas::Priority(list) => f.debug_tuple("Priority").field(list).finish(),
            PreferredReplicas::Selector(_) => f.write_str("Selector(..)"),
        }
    }
}

/// Pick a replica from one sentinel's reply
///
/// Down replicas are dropped first. Without a preference the first
/// available replica is taken.
pub fn select_replica(
    records: &[ReplicaRecord],
    preference: Option<&PreferredReplicas>,
) -> Option<ReplicaRecord> {
    let available: Vec<ReplicaRecord> = records
        .iter()
        .filter(|r| r.is_available())
        .cloned()
        .collect();

    if available.is_empty() {
        return None;
    }

    match preference {
        None => available.into_iter().next(),
        Some(PreferredReplicas::Selector(selector)) => selector.select(&available),
        Some(PreferredReplicas::Priority(list)) => select_by_priority(&available, list),
    }
}

/// Entries without an explicit priority rank after every explicit one
/// below `list.len()`. Ties keep the sentinel's ordering.
fn select_by_priority(
    available: &[ReplicaRecord],
    list: &[PreferredReplica],
) -> Option<ReplicaRecord> {
    let default_priority = list.len() as u32;

    let mut best: Option<(u32, &ReplicaRecord)> = None;
    for record in available {
        let priority = list
            .iter()
            .filter(|p| p.matches(record))
            .map(|p| p.priority.unwrap_or(default_priority))
            .min();

        if let Some(priority) = priority {
            if best.map_or(true, |(current, _)| priority < current) {
                best = Some((priority, record));
            }
        }
    }

    best.map(|(_, record)| record.clone())
}
