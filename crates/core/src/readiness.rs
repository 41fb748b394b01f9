//! Rollout readiness evaluation.
//!
//! A snapshot counts as rolled out only when every check in the chain passes.
//! The checks run in a fixed order and the first failing one is reported:
//! - the controller has observed the latest generation
//! - every desired replica runs the latest spec
//! - no stale replicas remain
//! - every updated replica is available
//! - the replica counters are consistent: none negative, `updated` and `available` within `total`
//!
//! Inconsistent counters are reported as pending rather than trusted; nothing here panics.

#![forbid(unsafe_code)]

use thiserror::Error;

use crate::ResourceSnapshot;

/// The first reason a snapshot is still rolling out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RolloutPending {
    #[error("generation {generation} not yet observed by controller, last seen was {observed_generation}")]
    NotYetObserved { generation: i64, observed_generation: i64 },
    #[error("only {updated} of {desired} desired replicas are updated")]
    UpdatedMismatch { desired: i64, updated: i64 },
    #[error("{total} replicas running, only {updated} are updated")]
    OutdatedReplicas { total: i64, updated: i64 },
    #[error("only {available} of {updated} updated replicas are available")]
    Unavailable { available: i64, updated: i64 },
    #[error("inconsistent replica counters: desired {desired}, updated {updated}, total {total}, available {available}")]
    OutOfRange { desired: i64, updated: i64, total: i64, available: i64 },
}

/// Run the readiness chain and report the first failing check.
pub fn check_rollout(s: &ResourceSnapshot) -> Result<(), RolloutPending> {
    if s.observed_generation < s.generation {
        return Err(RolloutPending::NotYetObserved {
            generation: s.generation,
            observed_generation: s.observed_generation,
        });
    }
    if s.updated_replicas != s.desired_replicas {
        return Err(RolloutPending::UpdatedMismatch { desired: s.desired_replicas, updated: s.updated_replicas });
    }
    if s.total_replicas > s.updated_replicas {
        return Err(RolloutPending::OutdatedReplicas { total: s.total_replicas, updated: s.updated_replicas });
    }
    if s.available_replicas < s.updated_replicas {
        return Err(RolloutPending::Unavailable { available: s.available_replicas, updated: s.updated_replicas });
    }
    let negative = [s.desired_replicas, s.updated_replicas, s.total_replicas, s.available_replicas].iter().any(|n| *n < 0);
    if negative || s.updated_replicas > s.total_replicas || s.available_replicas > s.total_replicas {
        return Err(RolloutPending::OutOfRange {
            desired: s.desired_replicas,
            updated: s.updated_replicas,
            total: s.total_replicas,
            available: s.available_replicas,
        });
    }
    Ok(())
}

pub fn is_rolled_out(s: &ResourceSnapshot) -> bool {
    check_rollout(s).is_ok()
}
