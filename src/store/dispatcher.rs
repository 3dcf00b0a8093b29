//! Fixed-interval batch drain. Runs as a dedicated tokio task: every tick it
//! atomically drains the pending-notification map and fans each unique
//! point out to every registered listener, bounded by a semaphore so one
//! slow listener doesn't stall the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::error;

use crate::point::Point;
use crate::store::listener::Registration;

pub struct DispatcherStats {
    pub batches_processed: AtomicU64,
    pub points_delivered: AtomicU64,
}

impl Default for DispatcherStats {
    fn default() -> Self {
        Self {
            batches_processed: AtomicU64::new(0),
            points_delivered: AtomicU64::new(0),
        }
    }
}

/// Runs until `running` observes `false`. Each tick:
/// 1. if `pending` is empty, skip;
/// 2. collect and remove every key currently in `pending` (writes landing
///    mid-drain on an already-removed key re-populate `pending` and are
///    deferred to the next tick -- this is the DashMap-shaped equivalent of
///    "new writes during the drain land in a fresh pending map");
/// 3. hand each drained point to every listener, fanned out under a
///    semaphore sized to the configured worker pool.
pub async fn run(
    pending: Arc<DashMap<u64, Point>>,
    listeners: Arc<ArcSwap<Vec<Registration>>>,
    interval: Duration,
    worker_pool_size: usize,
    stats: Arc<DispatcherStats>,
    running: Arc<std::sync::atomic::AtomicBool>,
) {
    let semaphore = Arc::new(Semaphore::new(worker_pool_size));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while running.load(Ordering::Acquire) {
        ticker.tick().await;

        if pending.is_empty() {
            continue;
        }

        let batch = drain(&pending);
        if batch.is_empty() {
            continue;
        }

        stats.batches_processed.fetch_add(1, Ordering::Relaxed);
        dispatch_batch(&batch, &listeners, &semaphore, &stats).await;
    }
}

fn drain(pending: &DashMap<u64, Point>) -> Vec<Point> {
    let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    let mut batch = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some((_, point)) = pending.remove(&key) {
            batch.push(point);
        }
    }
    batch
}

async fn dispatch_batch(
    batch: &[Point],
    listeners: &Arc<ArcSwap<Vec<Registration>>>,
    semaphore: &Arc<Semaphore>,
    stats: &Arc<DispatcherStats>,
) {
    let current_listeners = listeners.load_full();
    if current_listeners.is_empty() {
        return;
    }

    let mut handles = Vec::with_capacity(batch.len() * current_listeners.len());

    for point in batch {
        for (_, listener) in current_listeners.iter() {
            let permit = semaphore.clone().acquire_owned().await;
            let Ok(permit) = permit else { continue };
            let listener = listener.clone();
            let point = point.clone();
            let ioa = point.ioa;
            // A listener that panics only kills this one spawned task --
            // tokio isolates task panics, so it can't bring down the
            // dispatcher loop or affect any other listener's delivery. The
            // permit is held across the whole `on_point` future, not just
            // until the call returns a value, so a listener with real async
            // work (e.g. the 104 server's connection sends) is capped by
            // the semaphore for the full duration of that work.
            handles.push((ioa, tokio::spawn(async move {
                let _permit = permit;
                listener.on_point(&point).await;
            })));
            stats.points_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    for (ioa, handle) in handles {
        if let Err(e) = handle.await {
            error!(ioa, error = %e, "listener panicked during dispatch");
        }
    }
}
