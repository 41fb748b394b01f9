//! Rollwatch tracker: per-resource rollout phase and transition detection.

#![forbid(unsafe_code)]

use rollwatch_core::{check_rollout, Identity, Phase, ResourceSnapshot, RolloutEvent, Transition, TransitionKind, Uid};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod ingest;

pub use ingest::{spawn_tracker, StatsHandle, StopHandle, TrackerHandle};

/// Counts of tracked resources by phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub tracked: usize,
    pub rolling_out: usize,
    pub rolled_out: usize,
}

/// Tracks the rollout phase of every resource seen on one event stream.
///
/// The phase map is owned by the tracker alone. Events must be applied one at a time,
/// in the order the source delivered them.
#[derive(Debug, Default)]
pub struct RolloutTracker {
    phases: FxHashMap<Uid, Phase>,
}

impl RolloutTracker {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.phases.len() }
    pub fn is_empty(&self) -> bool { self.phases.is_empty() }

    /// Recorded phase; `None` means the resource is unknown.
    pub fn phase(&self, uid: &Uid) -> Option<Phase> { self.phases.get(uid).copied() }

    pub fn stats(&self) -> TrackerStats {
        let rolled_out = self.phases.values().filter(|p| **p == Phase::RolledOut).count();
        TrackerStats { tracked: self.phases.len(), rolling_out: self.phases.len() - rolled_out, rolled_out }
    }

    /// First sight of a resource. Records a rolling-out baseline; never notifies.
    pub fn on_added(&mut self, snapshot: &ResourceSnapshot) {
        self.phases.entry(snapshot.identity.uid).or_insert(Phase::RollingOut);
    }

    /// Re-evaluate readiness and report a transition if the phase flips.
    pub fn on_updated(&mut self, previous: &ResourceSnapshot, current: &ResourceSnapshot) -> Option<Transition> {
        let verdict = check_rollout(current);
        let ready = verdict.is_ok();
        debug!(
            resource = %current.identity,
            generation = current.generation,
            prev_generation = previous.generation,
            observed_generation = current.observed_generation,
            desired = current.desired_replicas,
            updated = current.updated_replicas,
            total = current.total_replicas,
            available = current.available_replicas,
            pending = ?verdict.err(),
            "deployment updated"
        );

        // Without an Added baseline the resource is assumed to be mid-rollout.
        let phase = self.phases.entry(current.identity.uid).or_insert(Phase::RollingOut);
        let kind = match (*phase, ready) {
            (Phase::RollingOut, true) => {
                *phase = Phase::RolledOut;
                TransitionKind::RolledOut
            }
            (Phase::RolledOut, false) => {
                *phase = Phase::RollingOut;
                TransitionKind::RollingOut
            }
            (Phase::RollingOut, false) | (Phase::RolledOut, true) => return None,
        };
        match kind {
            TransitionKind::RolledOut => info!(resource = %current.identity, "rollout completed"),
            TransitionKind::RollingOut => info!(resource = %current.identity, "rollout started"),
        }
        Some(Transition { kind, identity: current.identity.clone() })
    }

    /// Forget a resource. A later add starts from scratch.
    pub fn on_deleted(&mut self, identity: &Identity) {
        if self.phases.remove(&identity.uid).is_some() {
            debug!(resource = %identity, "stopped tracking deleted deployment");
        }
    }

    /// Dispatch one lifecycle event.
    pub fn apply(&mut self, event: &RolloutEvent) -> Option<Transition> {
        match event {
            RolloutEvent::Added(s) => {
                self.on_added(s);
                None
            }
            RolloutEvent::Updated { previous, current } => self.on_updated(previous, current),
            RolloutEvent::Deleted(id) => {
                self.on_deleted(id);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u8) -> Uid { let mut u = [0u8; 16]; u[0] = n; u }

    fn snap(n: u8, generation: i64, observed: i64, desired: i64, updated: i64, total: i64, available: i64) -> ResourceSnapshot {
        ResourceSnapshot {
            identity: Identity::new(uid(n), Some("default"), &format!("app-{}", n)),
            generation,
            observed_generation: observed,
            desired_replicas: desired,
            updated_replicas: updated,
            total_replicas: total,
            available_replicas: available,
        }
    }

    fn updated(prev: &ResourceSnapshot, cur: &ResourceSnapshot) -> RolloutEvent {
        RolloutEvent::Updated { previous: prev.clone(), current: cur.clone() }
    }

    #[test]
    fn rollout_scenario() {
        let mut t = RolloutTracker::new();
        let s0 = snap(1, 1, 1, 3, 0, 3, 3);
        assert_eq!(t.apply(&RolloutEvent::Added(s0.clone())), None);
        assert_eq!(t.phase(&uid(1)), Some(Phase::RollingOut));

        let s1 = snap(1, 1, 1, 3, 3, 3, 3);
        let n = t.apply(&updated(&s0, &s1)).unwrap();
        assert_eq!(n.kind, TransitionKind::RolledOut);
        assert_eq!(n.identity.to_string(), "default/app-1");

        // spec changed, not yet observed
        let s2 = snap(1, 2, 1, 3, 3, 3, 3);
        assert_eq!(t.apply(&updated(&s1, &s2)).map(|n| n.kind), Some(TransitionKind::RollingOut));

        let s3 = snap(1, 2, 2, 3, 1, 3, 1);
        assert_eq!(t.apply(&updated(&s2, &s3)), None);
        assert_eq!(t.phase(&uid(1)), Some(Phase::RollingOut));

        let s4 = snap(1, 2, 2, 3, 3, 3, 3);
        assert_eq!(t.apply(&updated(&s3, &s4)).map(|n| n.kind), Some(TransitionKind::RolledOut));
        assert_eq!(t.phase(&uid(1)), Some(Phase::RolledOut));
    }

    #[test]
    fn repeated_identical_update_is_a_noop() {
        let mut t = RolloutTracker::new();
        let ready = snap(1, 1, 1, 2, 2, 2, 2);
        t.on_added(&ready);
        assert!(t.on_updated(&ready, &ready).is_some());
        assert!(t.on_updated(&ready, &ready).is_none());

        let pending = snap(1, 2, 1, 2, 2, 2, 2);
        assert!(t.on_updated(&ready, &pending).is_some());
        assert!(t.on_updated(&pending, &pending).is_none());
    }

    #[test]
    fn update_without_add_assumes_rolling_out() {
        let mut t = RolloutTracker::new();
        let pending = snap(2, 3, 2, 1, 1, 1, 1);
        assert_eq!(t.on_updated(&pending, &pending), None);
        assert_eq!(t.phase(&uid(2)), Some(Phase::RollingOut));

        let mut t = RolloutTracker::new();
        let ready = snap(2, 3, 3, 1, 1, 1, 1);
        assert_eq!(t.on_updated(&ready, &ready).map(|n| n.kind), Some(TransitionKind::RolledOut));
    }

    #[test]
    fn add_does_not_reset_known_phase() {
        let mut t = RolloutTracker::new();
        let ready = snap(1, 1, 1, 1, 1, 1, 1);
        t.on_added(&ready);
        t.on_updated(&ready, &ready);
        t.on_added(&ready);
        assert_eq!(t.phase(&uid(1)), Some(Phase::RolledOut));
    }

    #[test]
    fn delete_clears_state() {
        let mut t = RolloutTracker::new();
        let ready = snap(1, 1, 1, 1, 1, 1, 1);
        t.on_added(&ready);
        t.on_updated(&ready, &ready);
        t.on_deleted(&ready.identity);
        assert_eq!(t.phase(&uid(1)), None);
        assert!(t.is_empty());

        assert_eq!(t.apply(&RolloutEvent::Added(ready.clone())), None);
        assert_eq!(t.phase(&uid(1)), Some(Phase::RollingOut));
        // first-ever semantics again: the next ready update notifies
        assert!(t.on_updated(&ready, &ready).is_some());
    }

    #[test]
    fn identities_are_tracked_independently() {
        let mut t = RolloutTracker::new();
        let a = snap(1, 1, 1, 1, 1, 1, 1);
        let b = snap(2, 1, 0, 1, 0, 1, 0);
        t.on_added(&a);
        t.on_added(&b);
        assert!(t.on_updated(&a, &a).is_some());
        assert!(t.on_updated(&b, &b).is_none());
        assert_eq!(t.stats(), TrackerStats { tracked: 2, rolling_out: 1, rolled_out: 1 });
    }

    #[test]
    fn one_notification_per_verdict_flip() {
        // xorshift keeps the sequence deterministic
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || { seed ^= seed << 13; seed ^= seed >> 7; seed ^= seed << 17; seed };

        let mut t = RolloutTracker::new();
        let first = snap(1, 1, 1, 2, 0, 2, 0);
        t.on_added(&first);
        let mut prev = first;
        // an added resource starts as not ready
        let mut last_ready = false;
        let (mut ups, mut downs, mut want_ups, mut want_downs) = (0, 0, 0, 0);
        for _ in 0..500 {
            let r = next();
            let generation = 1 + (r % 3) as i64;
            let observed = 1 + ((r >> 8) % 3) as i64;
            let updated = ((r >> 16) % 3) as i64;
            let available = ((r >> 24) % 3) as i64;
            let cur = snap(1, generation, observed, 2, updated, 2, available);
            let ready = rollwatch_core::is_rolled_out(&cur);
            match (last_ready, ready) {
                (false, true) => want_ups += 1,
                (true, false) => want_downs += 1,
                _ => {}
            }
            last_ready = ready;
            match t.on_updated(&prev, &cur).map(|n| n.kind) {
                Some(TransitionKind::RolledOut) => ups += 1,
                Some(TransitionKind::RollingOut) => downs += 1,
                None => {}
            }
            prev = cur;
        }
        assert!(want_ups > 0 && want_downs > 0);
        assert_eq!(ups, want_ups);
        assert_eq!(downs, want_downs);
    }
}
