//! Rollwatch kubehub – Deployment list/watch wiring and event mapping

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, ListParams},
    runtime::{watcher::{self, Event}, WatchStreamExt},
    Client,
};
use rollwatch_core::{Identity, ResourceSnapshot, RolloutEvent, Uid};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `spec.replicas` the API server defaults to when the field is unset.
pub const DEFAULT_REPLICAS: i64 = 1;
/// Stand-in for a missing `status.observedGeneration`; lower than any real generation.
pub const UNOBSERVED: i64 = -1;

fn to_uid(uid_str: &str) -> Result<Uid> {
    let u = Uuid::parse_str(uid_str).context("parsing metadata.uid as uuid")?;
    Ok(*u.as_bytes())
}

/// Project a Deployment onto the counters rollout readiness looks at.
///
/// Missing counters fall back to values that can only make the snapshot look less ready.
pub fn snapshot_from(d: &Deployment) -> Result<ResourceSnapshot> {
    let meta = &d.metadata;
    let uid_str = meta.uid.as_deref().ok_or_else(|| anyhow!("deployment missing metadata.uid"))?;
    let uid = to_uid(uid_str)?;
    let name = meta.name.as_deref().ok_or_else(|| anyhow!("deployment {} missing metadata.name", uid_str))?;
    let status = d.status.as_ref();
    let count = |v: Option<i32>| v.map(i64::from).unwrap_or(0);
    Ok(ResourceSnapshot {
        identity: Identity::new(uid, meta.namespace.as_deref(), name),
        generation: meta.generation.unwrap_or(0),
        observed_generation: status.and_then(|s| s.observed_generation).unwrap_or(UNOBSERVED),
        desired_replicas: d.spec.as_ref().and_then(|s| s.replicas).map(i64::from).unwrap_or(DEFAULT_REPLICAS),
        updated_replicas: count(status.and_then(|s| s.updated_replicas)),
        total_replicas: count(status.and_then(|s| s.replicas)),
        available_replicas: count(status.and_then(|s| s.available_replicas)),
    })
}

/// Turns watcher output into add/update/delete events.
///
/// The kube watcher only reports "applied" objects; the mapper remembers the last
/// snapshot per uid so it can tell first sight from an update and hand out the previous value.
#[derive(Debug, Default)]
pub struct EventMapper {
    known: FxHashMap<Uid, ResourceSnapshot>,
}

impl EventMapper {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.known.len() }
    pub fn is_empty(&self) -> bool { self.known.is_empty() }

    pub fn applied(&mut self, current: ResourceSnapshot) -> RolloutEvent {
        match self.known.insert(current.identity.uid, current.clone()) {
            Some(previous) => RolloutEvent::Updated { previous, current },
            None => RolloutEvent::Added(current),
        }
    }

    pub fn deleted(&mut self, identity: Identity) -> RolloutEvent {
        // prefer the identity we announced, in case the tombstone is sparse
        match self.known.remove(&identity.uid) {
            Some(last) => RolloutEvent::Deleted(last.identity),
            None => RolloutEvent::Deleted(identity),
        }
    }

    /// Full relist: every listed object is applied, known objects missing from the list are deleted.
    pub fn restarted(&mut self, list: Vec<ResourceSnapshot>) -> Vec<RolloutEvent> {
        let listed: FxHashSet<Uid> = list.iter().map(|s| s.identity.uid).collect();
        let gone: Vec<Uid> = self.known.keys().filter(|uid| !listed.contains(*uid)).copied().collect();
        let mut out = Vec::with_capacity(list.len() + gone.len());
        for uid in gone {
            if let Some(last) = self.known.remove(&uid) {
                out.push(RolloutEvent::Deleted(last.identity));
            }
        }
        for s in list {
            out.push(self.applied(s));
        }
        out
    }

    /// Map one watcher event. Objects that cannot be projected are logged and skipped.
    pub fn map(&mut self, ev: Event<Deployment>) -> Vec<RolloutEvent> {
        match ev {
            Event::Applied(d) => match project(&d) {
                Some(s) => vec![self.applied(s)],
                None => Vec::new(),
            },
            Event::Deleted(d) => match project(&d) {
                Some(s) => vec![self.deleted(s.identity)],
                None => Vec::new(),
            },
            Event::Restarted(list) => {
                debug!(count = list.len(), "watch restart");
                let snaps = list.iter().filter_map(project).collect();
                self.restarted(snaps)
            }
        }
    }
}

fn project(d: &Deployment) -> Option<ResourceSnapshot> {
    match snapshot_from(d) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, name = ?d.metadata.name, "skipping deployment");
            metrics::counter!("watch_skipped_objects_total", 1u64);
            None
        }
    }
}

fn deployments_api(client: Client, namespace: Option<&str>) -> Api<Deployment> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// List+watch Deployments in one namespace (or all) and send mapped events into `tx`.
///
/// Client and initial list failures are returned; mid-stream errors are retried with backoff.
/// Returns once the receiving side of `tx` is gone or the stream ends.
pub async fn start_watcher(namespace: Option<&str>, tx: mpsc::Sender<RolloutEvent>) -> Result<()> {
    let client = Client::try_default().await.context("building kube client")?;
    let api = deployments_api(client, namespace);
    // Surface connection and auth problems before entering the watch loop
    api.list(&ListParams::default().limit(1)).await.context("listing deployments")?;

    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(ns = ?namespace, "deployment watcher started");
    let mut mapper = EventMapper::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(ev) => {
                for e in mapper.map(ev) {
                    if tx.send(e).await.is_err() {
                        debug!("event receiver closed; stopping watcher");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "watch error; reconnecting");
                metrics::counter!("watch_errors_total", 1u64);
            }
        }
    }
    warn!("watcher stream ended");
    Ok(())
}
