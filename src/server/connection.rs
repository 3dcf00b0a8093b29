//! Per-connection handler: the protocol listener for one accepted socket.
//!
//! Owns inbound command dispatch (General Interrogation, Counter
//! Interrogation, Clock Synchronization, and the unknown-type-id fallback)
//! and is the target of the 104 server's spontaneous broadcast.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::asdu::{self, Cot};
use crate::point::Point;
use crate::store::PointStore;

use super::transport::{AsduHeader, FrameWriter};

/// Inbound command type identifiers this gateway recognises. Any other
/// value gets the `UNKNOWN_TYPE_ID` reply.
pub const C_IC_NA_1: u8 = 100;
pub const C_CI_NA_1: u8 = 101;
pub const C_CS_NA_1: u8 = 103;

/// Connection lifecycle state, per spec.md §4.5: `Accepted` -> `Active` ->
/// `Closed` (terminal). `Accepted` exists only for the instant between
/// `TcpStream::accept` returning and the handler being constructed; by the
/// time a `Connection` value exists it is already `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closed,
}

pub struct Connection {
    pub peer_addr: SocketAddr,
    store: Arc<PointStore>,
    active: AtomicBool,
    writer: AsyncMutex<Option<FrameWriter>>,
    recv_seq: AtomicU32,
}

impl Connection {
    pub fn new(peer_addr: SocketAddr, store: Arc<PointStore>, writer: FrameWriter) -> Arc<Self> {
        Arc::new(Self {
            peer_addr,
            store,
            active: AtomicBool::new(true),
            writer: AsyncMutex::new(Some(writer)),
            recv_seq: AtomicU32::new(0),
        })
    }

    /// A connection with no underlying socket, for admission-table and
    /// unit tests that only need identity and active-flag behaviour.
    #[cfg(test)]
    pub fn for_test(store: Arc<PointStore>, peer_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            peer_addr,
            store,
            active: AtomicBool::new(true),
            writer: AsyncMutex::new(None),
            recv_seq: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> ConnectionState {
        if self.active.load(Ordering::Acquire) {
            ConnectionState::Active
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_recv_seq(&self, recv_seq: u16) {
        self.recv_seq.store(recv_seq as u32, Ordering::Relaxed);
    }

    fn recv_seq(&self) -> u16 {
        self.recv_seq.load(Ordering::Relaxed) as u16
    }

    /// Builds an ASDU for the given point with `COT = SPONTANEOUS` and
    /// sends it. If the connection is already closed, drops silently (per
    /// spec.md §4.5) and reports `false` so the broadcaster can count it as
    /// a no-op rather than a failure.
    pub async fn send_spontaneous(&self, point: &Point) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(built) = asdu::build_asdu(point, Cot::Spontaneous) else {
            return false;
        };
        self.send_asdu_bytes(&built.encode()).await
    }

    /// Sends one data ASDU with `COT = INTERROGATED_BY_STATION`, used by
    /// the General/Counter Interrogation reply sequence.
    pub async fn send_interrogated(&self, point: &Point) -> bool {
        let Some(built) = asdu::build_asdu(point, Cot::InterrogatedByStation) else {
            return false;
        };
        self.send_asdu_bytes(&built.encode()).await
    }

    async fn send_asdu_bytes(&self, bytes: &[u8]) -> bool {
        let recv_seq = self.recv_seq();
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        match writer.send_asdu(bytes, recv_seq).await {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %self.peer_addr, error = %e, "send failed, marking connection dead");
                self.active.store(false, Ordering::Release);
                false
            }
        }
    }

    pub async fn send_ack(&self, recv_seq: u16) {
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.send_ack(recv_seq).await {
                warn!(peer = %self.peer_addr, error = %e, "ack send failed");
                self.active.store(false, Ordering::Release);
            }
        }
    }

    /// Dispatches an inbound command ASDU based on its type identifier.
    /// Filtering by qualifier of interrogation is not implemented -- all
    /// points are returned, matching spec.md §4.5's documented limitation.
    pub async fn handle_command(&self, header: AsduHeader, qualifier: u8) {
        match header.type_code {
            C_IC_NA_1 => {
                debug!(peer = %self.peer_addr, "general interrogation requested");
                self.run_interrogation(header, qualifier, C_IC_NA_1).await;
            }
            C_CI_NA_1 => {
                // spec.md §9: the source sends all points here too, with a
                // comment noting it should filter to M_IT_* (integrated
                // totals) types. This gateway doesn't emit M_IT_* at all,
                // so the observed behaviour and the "correct" filtered
                // behaviour coincide for every point this gateway can
                // produce; documented as the resolved Open Question in
                // DESIGN.md rather than decided silently here.
                debug!(peer = %self.peer_addr, "counter interrogation requested");
                self.run_interrogation(header, qualifier, C_CI_NA_1).await;
            }
            C_CS_NA_1 => {
                debug!(peer = %self.peer_addr, "clock sync requested (not applied)");
                let reply = asdu::encode_command_reply(
                    C_CS_NA_1,
                    Cot::ActivationConfirmation,
                    false,
                    header.originator_address,
                    header.common_address,
                    header.ioa,
                    qualifier,
                );
                self.send_asdu_bytes(&reply).await;
            }
            other => {
                debug!(peer = %self.peer_addr, type_code = other, "unknown inbound type id");
                let reply = asdu::encode_command_reply(
                    other,
                    Cot::UnknownTypeId,
                    true,
                    header.originator_address,
                    header.common_address,
                    header.ioa,
                    qualifier,
                );
                self.send_asdu_bytes(&reply).await;
            }
        }
    }

    async fn run_interrogation(&self, header: AsduHeader, qualifier: u8, type_code: u8) {
        let confirm = asdu::encode_command_reply(
            type_code,
            Cot::ActivationConfirmation,
            false,
            header.originator_address,
            header.common_address,
            header.ioa,
            qualifier,
        );
        if !self.send_asdu_bytes(&confirm).await {
            return;
        }

        for point in self.store.snapshot() {
            self.send_interrogated(&point).await;
        }

        let termination = asdu::encode_command_reply(
            type_code,
            Cot::ActivationTermination,
            false,
            header.originator_address,
            header.common_address,
            header.ioa,
            qualifier,
        );
        self.send_asdu_bytes(&termination).await;
    }

    /// Idempotent. Flips `active` to false and logs; a second call is a
    /// no-op (checked via `compare_exchange`).
    pub fn close(&self) {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(peer = %self.peer_addr, "connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = PointStore::new(GatewayConfig::default());
        let conn = Connection::for_test(store.clone(), "127.0.0.1:9".parse().unwrap());
        assert_eq!(conn.state(), ConnectionState::Active);
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close(); // no panic
        assert_eq!(conn.state(), ConnectionState::Closed);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn closed_connection_drops_spontaneous_sends() {
        use crate::asdu::TypeId;
        use crate::point::PointValue;

        let store = PointStore::new(GatewayConfig::default());
        let conn = Connection::for_test(store.clone(), "127.0.0.1:9".parse().unwrap());
        conn.close();

        let point = Point::with_value(1001, 1, TypeId::MMeNc1, PointValue::F32(1.0));
        let sent = conn.send_spontaneous(&point).await;
        assert!(!sent);
        store.shutdown().await;
    }
}
