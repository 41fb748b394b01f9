//! Rollwatch core types: resource snapshots, lifecycle events and transitions.

#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub mod readiness;

pub use readiness::{check_rollout, is_rolled_out, RolloutPending};

pub type Uid = [u8; 16];

/// Identity of one workload resource.
///
/// Equality and hashing only look at `uid`; namespace and name ride along for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub uid: Uid,
    pub namespace: Option<String>,
    pub name: String,
}

impl Identity {
    pub fn new(uid: Uid, namespace: Option<&str>, name: &str) -> Self {
        Self { uid, namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool { self.uid == other.uid }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) { self.uid.hash(state) }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Spec/status counters of a workload resource observed at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub identity: Identity,
    /// Bumped by the control plane on every spec change.
    pub generation: i64,
    /// Generation the managing controller has finished reconciling.
    pub observed_generation: i64,
    pub desired_replicas: i64,
    /// Replicas running the latest spec.
    pub updated_replicas: i64,
    /// Replicas running any spec version.
    pub total_replicas: i64,
    /// Replicas passing their readiness check.
    pub available_replicas: i64,
}

/// Lifecycle event delivered by an event source, in order per identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RolloutEvent {
    Added(ResourceSnapshot),
    Updated { previous: ResourceSnapshot, current: ResourceSnapshot },
    Deleted(Identity),
}

impl RolloutEvent {
    pub fn identity(&self) -> &Identity {
        match self {
            RolloutEvent::Added(s) => &s.identity,
            RolloutEvent::Updated { current, .. } => &current.identity,
            RolloutEvent::Deleted(id) => id,
        }
    }

    /// Short event label used for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            RolloutEvent::Added(_) => "added",
            RolloutEvent::Updated { .. } => "updated",
            RolloutEvent::Deleted(_) => "deleted",
        }
    }
}

/// Recorded rollout phase of a tracked resource. A resource with no entry is unknown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    RollingOut,
    RolledOut,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    RollingOut,
    RolledOut,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::RollingOut => "rolling_out",
            TransitionKind::RolledOut => "rolled_out",
        }
    }
}

/// Notification emitted once per phase change of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub identity: Identity,
}

pub mod prelude {
    pub use super::{Identity, Phase, ResourceSnapshot, RolloutEvent, Transition, TransitionKind, Uid};
    pub use super::readiness::{check_rollout, is_rolled_out, RolloutPending};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn uid(n: u8) -> Uid { let mut u = [0u8; 16]; u[0] = n; u }

    #[test]
    fn identity_eq_and_hash_follow_uid() {
        let a = Identity::new(uid(1), Some("ns"), "web");
        let renamed = Identity::new(uid(1), Some("other"), "api");
        let b = Identity::new(uid(2), Some("ns"), "web");
        assert_eq!(a, renamed);
        assert_ne!(a, b);
        let set: HashSet<_> = [a, renamed, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn identity_display() {
        assert_eq!(Identity::new(uid(1), Some("prod"), "web").to_string(), "prod/web");
        assert_eq!(Identity::new(uid(1), None, "global").to_string(), "global");
    }

    #[test]
    fn transition_kind_serializes_snake_case() {
        let v = serde_json::to_value(TransitionKind::RolledOut).unwrap();
        assert_eq!(v, serde_json::json!("rolled_out"));
        assert_eq!(TransitionKind::RollingOut.as_str(), "rolling_out");
    }
}
