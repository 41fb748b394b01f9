//! Serialized event loop driving a `RolloutTracker`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rollwatch_core::{RolloutEvent, Transition};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{RolloutTracker, TrackerStats};

/// Stops the tracker loop. Dropping it without calling `stop` leaves the loop running.
#[derive(Debug)]
pub struct StopHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl StopHandle {
    pub fn stop(mut self) {
        if let Some(tx) = self.tx.take() { let _ = tx.send(()); }
    }
}

/// Read-only view of tracker state, safe to clone into other tasks.
#[derive(Clone)]
pub struct StatsHandle {
    snap: Arc<ArcSwap<TrackerStats>>,
    processed_rx: watch::Receiver<u64>,
}

impl StatsHandle {
    pub fn current(&self) -> TrackerStats { **self.snap.load() }
    /// Number of events the loop has applied so far.
    pub fn subscribe_processed(&self) -> watch::Receiver<u64> { self.processed_rx.clone() }
}

pub struct TrackerHandle {
    pub notifications: mpsc::Receiver<Transition>,
    pub stop: StopHandle,
    pub stats: StatsHandle,
    pub task: JoinHandle<()>,
}

/// Spawn the tracker loop. Returns the event sender and a handle for notifications, stats and shutdown.
///
/// The loop exits when `stop` fires or every event sender has been dropped.
pub fn spawn_tracker(cap: usize) -> (mpsc::Sender<RolloutEvent>, TrackerHandle) {
    let cap = cap.max(1);
    let (tx, mut rx) = mpsc::channel::<RolloutEvent>(cap);
    let (notify_tx, notify_rx) = mpsc::channel::<Transition>(cap);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (processed_tx, processed_rx) = watch::channel(0u64);
    let snap = Arc::new(ArcSwap::from_pointee(TrackerStats::default()));
    let snap_clone = Arc::clone(&snap);

    let task = tokio::spawn(async move {
        // resolves only on an explicit stop; a dropped StopHandle parks forever
        let stopped = async move {
            if stop_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(stopped);

        let mut tracker = RolloutTracker::new();
        let mut processed: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => {
                    info!("stop requested; leaving tracker loop");
                    break;
                }
                maybe = rx.recv() => {
                    let Some(ev) = maybe else {
                        debug!("event channel closed; exiting tracker loop");
                        break;
                    };
                    metrics::counter!("rollout_events_total", 1u64, "event" => ev.label());
                    if let Some(t) = tracker.apply(&ev) {
                        metrics::counter!("rollout_transitions_total", 1u64, "kind" => t.kind.as_str());
                        // a full notification queue must not hold off stop
                        tokio::select! {
                            biased;
                            _ = &mut stopped => {
                                info!("stop requested while notifying; leaving tracker loop");
                                break;
                            }
                            // receiver gone means nobody listens; keep tracking anyway
                            _ = notify_tx.send(t) => {}
                        }
                    }
                    let stats = tracker.stats();
                    metrics::gauge!("rollout_tracked", stats.tracked as f64);
                    metrics::gauge!("rollout_in_progress", stats.rolling_out as f64);
                    snap_clone.store(Arc::new(stats));
                    processed = processed.saturating_add(1);
                    let _ = processed_tx.send(processed);
                }
            }
        }
        info!(tracked = tracker.len(), processed, "tracker loop stopped");
    });

    let handle = TrackerHandle {
        notifications: notify_rx,
        stop: StopHandle { tx: Some(stop_tx) },
        stats: StatsHandle { snap, processed_rx },
        task,
    };
    (tx, handle)
}
