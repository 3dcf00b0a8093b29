//! The point store: a shared, concurrent, coalescing latest-value cache
//! that fans updates out to subscribers under high update rates and
//! variable subscriber latency.
//!
//! This is an owned instance constructed once at startup and passed by
//! `Arc` reference to every adapter and to the 104 server -- not a lazily
//! initialised process-wide singleton. The underlying requirement (a
//! single fan-out point for all writers) is met by sharing the `Arc`, which
//! also makes re-initialisation a type error instead of a runtime check.

mod dispatcher;
pub mod listener;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::GatewayConfig;
use crate::point::Point;
use dispatcher::DispatcherStats;
pub use listener::{Listener, ListenerId, PointListener, SyncListener};
use listener::{ListenerIdGen, Registration};

fn pack_key(common_address: u16, ioa: u32) -> u64 {
    ((common_address as u64) << 32) | (ioa as u64)
}

/// Snapshot of store instrumentation, per spec.md §4.3 `stats()`.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub point_count: usize,
    pub listener_count: usize,
    pub pending_notifications: usize,
    pub estimated_memory_kb: usize,
    pub coalesced_updates: u64,
    pub total_updates: u64,
}

pub struct PointStore {
    live: Arc<DashMap<u64, Point>>,
    pending: Arc<DashMap<u64, Point>>,
    listeners: Arc<ArcSwap<Vec<Registration>>>,
    listener_write_guard: Mutex<()>,
    listener_ids: ListenerIdGen,
    coalesced_updates: AtomicU64,
    total_updates: AtomicU64,
    dropped_at_shutdown: AtomicU64,
    dispatcher_stats: Arc<DispatcherStats>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    config: GatewayConfig,
}

impl PointStore {
    /// Construct and start the dispatcher task. The store is live as soon
    /// as this returns -- there is no separate "activate" step like the
    /// 104 server has, since the store has no bind/listen phase.
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let store = Arc::new(Self {
            live: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            listeners: Arc::new(ArcSwap::from_pointee(Vec::new())),
            listener_write_guard: Mutex::new(()),
            listener_ids: ListenerIdGen::default(),
            coalesced_updates: AtomicU64::new(0),
            total_updates: AtomicU64::new(0),
            dropped_at_shutdown: AtomicU64::new(0),
            dispatcher_stats: Arc::new(DispatcherStats::default()),
            dispatcher_handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(true)),
            config,
        });

        let pending = store.pending.clone();
        let listeners = store.listeners.clone();
        let interval = store.config.batch_interval();
        let pool_size = store.config.worker_pool_size();
        let dispatcher_stats = store.dispatcher_stats.clone();
        let running = store.running.clone();

        let handle = tokio::spawn(async move {
            dispatcher::run(pending, listeners, interval, pool_size, dispatcher_stats, running).await;
        });
        *store.dispatcher_handle.lock() = Some(handle);

        store
    }

    /// Non-blocking. Rejects null/zero-IOA input with a warning and no-op.
    /// Replaces any existing point at the same `(common_address, ioa)`.
    /// Records the write into the pending-notification map; if an entry
    /// already existed there, increments `coalesced_updates` and silently
    /// discards the older pending notification in favour of the newest.
    pub fn update(&self, point: Point) {
        if point.ioa == 0 {
            warn!(ca = point.common_address, "rejecting update with ioa=0");
            return;
        }

        let key = pack_key(point.common_address, point.ioa);
        self.total_updates.fetch_add(1, Ordering::Relaxed);

        self.live.insert(key, point.clone());

        if self.pending.insert(key, point).is_some() {
            self.coalesced_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Latest value for an IOA within a common address, or absent.
    pub fn get(&self, common_address: u16, ioa: u32) -> Option<Point> {
        self.live.get(&pack_key(common_address, ioa)).map(|e| e.clone())
    }

    /// Immutable shallow copy of the whole live set, for interrogation
    /// responses. Snapshot isolation is weak: readers see a point-in-time
    /// consistent view per-key but not across the map.
    pub fn snapshot(&self) -> Vec<Point> {
        self.live.iter().map(|e| e.value().clone()).collect()
    }

    /// Cheap view of live keys, no copy of values.
    pub fn keys(&self) -> Vec<(u16, u32)> {
        self.live
            .iter()
            .map(|e| {
                let key = *e.key();
                ((key >> 32) as u16, (key & 0xFFFF_FFFF) as u32)
            })
            .collect()
    }

    /// Register a listener, returning a handle for later removal. Emits a
    /// warning above a soft ceiling of 10 live listeners to flag probable
    /// leaks in subscriber lifecycle.
    pub fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = self.listener_ids.next();
        let _guard = self.listener_write_guard.lock();
        let mut updated = (**self.listeners.load()).clone();
        updated.push((id, listener));
        let count = updated.len();
        self.listeners.store(Arc::new(updated));

        if count > self.config.listener_soft_leak_threshold {
            warn!(count, "listener count exceeds soft leak threshold");
        }

        id
    }

    /// Idempotent: removing an already-absent id is a no-op.
    pub fn remove_listener(&self, id: ListenerId) {
        let _guard = self.listener_write_guard.lock();
        let updated: Vec<Registration> = (**self.listeners.load())
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        self.listeners.store(Arc::new(updated));
    }

    pub fn stats(&self) -> StoreStats {
        let point_count = self.live.len();
        StoreStats {
            point_count,
            listener_count: self.listeners.load().len(),
            pending_notifications: self.pending.len(),
            estimated_memory_kb: point_count * 500 / 1024,
            coalesced_updates: self.coalesced_updates.load(Ordering::Relaxed),
            total_updates: self.total_updates.load(Ordering::Relaxed),
        }
    }

    /// Drain best-effort; log dropped pending notifications. Bounds the
    /// dispatcher join and does not block forever if the dispatcher is
    /// wedged.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);

        let dropped = self.pending.len();
        if dropped > 0 {
            self.dropped_at_shutdown
                .fetch_add(dropped as u64, Ordering::Relaxed);
            warn!(dropped, "dropping pending notifications at shutdown");
        }

        let handle = self.dispatcher_handle.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "dispatcher task join error"),
                Err(_) => warn!("dispatcher did not stop within 5s, abandoning"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asdu::TypeId;
    use crate::point::PointValue;
    use crate::store::listener::SyncListener;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn cfg_fast() -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        cfg.batch_interval_ms = 20;
        cfg
    }

    #[tokio::test]
    async fn last_write_wins_for_same_ioa() {
        let store = PointStore::new(cfg_fast());
        for v in 0..5 {
            store.update(Point::with_value(1001, 1, TypeId::MMeNc1, PointValue::F32(v as f32)));
        }
        let p = store.get(1, 1001).unwrap();
        assert_eq!(p.value, PointValue::F32(4.0));
        store.shutdown().await;
    }

    #[tokio::test]
    async fn zero_ioa_is_rejected() {
        let store = PointStore::new(cfg_fast());
        store.update(Point::with_value(0, 1, TypeId::MMeNc1, PointValue::F32(1.0)));
        assert!(store.get(1, 0).is_none());
        assert_eq!(store.stats().point_count, 0);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn listener_receives_latest_value_after_batch_interval() {
        let store = PointStore::new(cfg_fast());
        let received: Arc<Mutex<Option<f32>>> = Arc::new(Mutex::new(None));
        let received2 = received.clone();

        store.add_listener(SyncListener::new(move |p: &Point| {
            if let PointValue::F32(v) = p.value {
                *received2.lock() = Some(v);
            }
        }));

        store.update(Point::with_value(1001, 1, TypeId::MMeNc1, PointValue::F32(123.45)));

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(*received.lock(), Some(123.45));
        store.shutdown().await;
    }

    #[tokio::test]
    async fn burst_coalesces_to_single_listener_invocation() {
        let store = PointStore::new(cfg_fast());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let last_value = Arc::new(Mutex::new(-1.0f32));
        let last_value2 = last_value.clone();

        store.add_listener(SyncListener::new(move |p: &Point| {
            count2.fetch_add(1, Ordering::Relaxed);
            if let PointValue::F32(v) = p.value {
                *last_value2.lock() = v;
            }
        }));

        for v in 0..1000 {
            store.update(Point::with_value(1001, 1, TypeId::MMeNc1, PointValue::F32(v as f32)));
        }

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(*last_value.lock(), 999.0);
        assert!(store.stats().coalesced_updates >= 999);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn remove_listener_is_idempotent() {
        let store = PointStore::new(cfg_fast());
        let id = store.add_listener(SyncListener::new(|_: &Point| {}));
        store.remove_listener(id);
        store.remove_listener(id); // no panic, no-op
        assert_eq!(store.stats().listener_count, 0);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_reflects_live_values() {
        let store = PointStore::new(cfg_fast());
        store.update(Point::with_value(1001, 1, TypeId::MMeNc1, PointValue::F32(10.0)));
        store.update(Point::with_value(1002, 1, TypeId::MMeNc1, PointValue::F32(20.0)));

        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn listener_panic_does_not_affect_other_listeners() {
        let store = PointStore::new(cfg_fast());
        let good_called = Arc::new(AtomicUsize::new(0));
        let good_called2 = good_called.clone();

        store.add_listener(SyncListener::new(|_: &Point| panic!("boom")));
        store.add_listener(SyncListener::new(move |_: &Point| {
            good_called2.fetch_add(1, Ordering::Relaxed);
        }));

        store.update(Point::with_value(1001, 1, TypeId::MMeNc1, PointValue::F32(1.0)));
        tokio::time::sleep(StdDuration::from_millis(60)).await;

        assert_eq!(good_called.load(Ordering::Relaxed), 1);
        store.shutdown().await;
    }
}
