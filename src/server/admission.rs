//! Connection admission cap and rate-limited rejection logging.
//!
//! The active-connection list uses copy-on-write semantics (an `ArcSwap`ed
//! `Vec`) for the same reason the point store's listener list does:
//! traversal during broadcast must be stable against concurrent add/remove.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::warn;

use crate::server::connection::Connection;

pub struct AdmissionTable {
    active: ArcSwap<Vec<Arc<Connection>>>,
    write_guard: Mutex<()>,
    max_connections: usize,
    rejection_log_interval: Duration,
    last_rejection_log: Mutex<Instant>,
    rejected_since_last_log: AtomicU64,
}

impl AdmissionTable {
    pub fn new(max_connections: usize, rejection_log_interval: Duration) -> Self {
        Self {
            active: ArcSwap::from_pointee(Vec::new()),
            write_guard: Mutex::new(()),
            max_connections,
            rejection_log_interval,
            last_rejection_log: Mutex::new(Instant::now() - rejection_log_interval),
            rejected_since_last_log: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.active.load().len()
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Connection>>> {
        self.active.load_full()
    }

    /// Attempts to admit a connection. Returns `true` if admitted (the
    /// caller should proceed to spawn the handler), `false` if the cap was
    /// already at `max_connections` -- the caller must close the socket
    /// immediately and never count it toward the active set.
    pub fn try_admit(&self, connection: Arc<Connection>) -> bool {
        let _guard = self.write_guard.lock();
        let current = self.active.load();
        if current.len() >= self.max_connections {
            return false;
        }
        let mut updated = (**current).clone();
        updated.push(connection);
        self.active.store(Arc::new(updated));
        true
    }

    /// Removes a connection from the active set. This is the only place
    /// the active set shrinks outside of the in-line dead-handler sweep
    /// during broadcast.
    pub fn remove(&self, connection: &Arc<Connection>) {
        let _guard = self.write_guard.lock();
        let updated: Vec<Arc<Connection>> = (**self.active.load())
            .iter()
            .filter(|c| !Arc::ptr_eq(c, connection))
            .cloned()
            .collect();
        self.active.store(Arc::new(updated));
    }

    /// Record a rejection due to the admission cap. At most one WARN is
    /// emitted per `rejection_log_interval`, carrying the cumulative
    /// rejected count since the last log and the most recent peer id.
    pub fn record_rejection(&self, peer: &str) {
        let rejected = self.rejected_since_last_log.fetch_add(1, Ordering::Relaxed) + 1;

        let mut last_log = self.last_rejection_log.lock();
        if last_log.elapsed() >= self.rejection_log_interval {
            warn!(
                rejected_count = rejected,
                latest_peer = peer,
                "rejecting connection: admission cap reached"
            );
            *last_log = Instant::now();
            self.rejected_since_last_log.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::store::PointStore;
    use pretty_assertions::assert_eq;

    fn table(max: usize) -> AdmissionTable {
        AdmissionTable::new(max, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn admits_up_to_cap_then_rejects() {
        let store = PointStore::new(GatewayConfig::default());
        let table = table(2);

        let c1 = Connection::for_test(store.clone(), "127.0.0.1:1".parse().unwrap());
        let c2 = Connection::for_test(store.clone(), "127.0.0.1:2".parse().unwrap());
        let c3 = Connection::for_test(store.clone(), "127.0.0.1:3".parse().unwrap());

        assert!(table.try_admit(c1));
        assert!(table.try_admit(c2));
        assert!(!table.try_admit(c3));
        assert_eq!(table.len(), 2);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn remove_shrinks_active_set() {
        let store = PointStore::new(GatewayConfig::default());
        let table = table(2);
        let c1 = Connection::for_test(store.clone(), "127.0.0.1:1".parse().unwrap());
        table.try_admit(c1.clone());
        assert_eq!(table.len(), 1);
        table.remove(&c1);
        assert_eq!(table.len(), 0);
        store.shutdown().await;
    }
}
