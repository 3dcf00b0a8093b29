//! Listener handle bookkeeping. Identifying listeners by handle rather than
//! by callback-object identity (the source system's fragile approach) makes
//! `remove_listener` precise and O(1) regardless of what the listener
//! closes over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::point::Point;

/// A per-point subscriber notified by the dispatcher's batched fan-out.
///
/// `on_point` runs inside the dispatcher's semaphore-bounded worker pool
/// for as long as its future is pending -- the permit for this invocation
/// isn't released until `on_point` returns. That's load-bearing: any actual
/// work a listener does (including I/O, like the 104 server's connection
/// sends) must happen inside this call rather than being handed off to an
/// unbounded spawn, or the worker-pool cap the store is supposed to enforce
/// is meaningless.
#[async_trait]
pub trait PointListener: Send + Sync + 'static {
    async fn on_point(&self, point: &Point);
}

/// Adapts a plain synchronous closure into a `PointListener`, for callers
/// with no async work of their own.
pub struct SyncListener<F>(F);

impl<F> SyncListener<F>
where
    F: Fn(&Point) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

#[async_trait]
impl<F> PointListener for SyncListener<F>
where
    F: Fn(&Point) + Send + Sync + 'static,
{
    async fn on_point(&self, point: &Point) {
        (self.0)(point)
    }
}

/// A registered listener: always reached through the `Arc<dyn ...>` so the
/// dispatcher can hand the same listener to multiple concurrent worker
/// tasks without cloning the implementation itself.
pub type Listener = Arc<dyn PointListener>;

/// Opaque subscription token returned by `PointStore::add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerIdGen(AtomicU64);

impl ListenerIdGen {
    pub fn next(&self) -> ListenerId {
        ListenerId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

pub type Registration = (ListenerId, Listener);
