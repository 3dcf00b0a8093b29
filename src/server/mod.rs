//! The IEC 60870-5-104 server: accepts client connections up to the
//! admission cap, drives the APCI/ASDU framing on each, and broadcasts
//! spontaneous updates from the point store to every active connection.

pub mod admission;
pub mod connection;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::ServerError;
use crate::point::Point;
use crate::store::{ListenerId, PointListener, PointStore};

use admission::AdmissionTable;
use connection::Connection;
use transport::{ApciKind, FrameReader, FrameWriter};

/// Default qualifier of interrogation used for command replies when the
/// inbound frame didn't carry an information object (e.g. a malformed or
/// truncated activation). 20 is "station interrogation" in the standard's
/// QOI enumeration.
const DEFAULT_QOI: u8 = 20;

pub struct Server {
    store: Arc<PointStore>,
    admission: Arc<AdmissionTable>,
    config: GatewayConfig,
    listener_id: Mutex<Option<ListenerId>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(store: Arc<PointStore>, config: GatewayConfig) -> Arc<Self> {
        let admission = Arc::new(AdmissionTable::new(
            config.max_connections,
            config.rejection_log_interval(),
        ));
        Arc::new(Self {
            store,
            admission,
            config,
            listener_id: Mutex::new(None),
            accept_handle: Mutex::new(None),
        })
    }

    /// Binds the listening socket, registers the broadcast listener with
    /// the point store, and spawns the accept loop. Returns once bound;
    /// the accept loop itself runs for the lifetime of the server.
    pub async fn activate(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.accept_handle.lock().is_some() {
            return Err(ServerError::AlreadyActive);
        }

        let tcp_listener = bind_listener(&self.config.bind_addr_string(), self.config.listen_backlog)?;
        info!(addr = %self.config.bind_addr_string(), backlog = self.config.listen_backlog, "104 server listening");

        let listener_id = self.store.add_listener(Arc::new(BroadcastListener {
            admission: self.admission.clone(),
        }));
        *self.listener_id.lock() = Some(listener_id);

        let server = self.clone();
        let handle = tokio::spawn(async move {
            server.accept_loop(tcp_listener).await;
        });
        *self.accept_handle.lock() = Some(handle);

        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, tcp_listener: TcpListener) {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.handle_connection(stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let writer = FrameWriter::new(write_half);
        let mut reader = FrameReader::new(read_half);

        let connection = Connection::new(peer_addr, self.store.clone(), writer);

        if !self.admission.try_admit(connection.clone()) {
            self.admission.record_rejection(&peer_addr.to_string());
            connection.close();
            return;
        }

        info!(peer = %peer_addr, active = self.admission.len(), "connection admitted");

        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => self.dispatch_frame(&connection, &mut reader, frame).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "frame read failed");
                    break;
                }
            }
            if !connection.is_active() {
                break;
            }
        }

        connection.close();
        self.admission.remove(&connection);
        info!(peer = %peer_addr, "connection removed");
    }

    async fn dispatch_frame(
        &self,
        connection: &Arc<Connection>,
        reader: &mut FrameReader,
        frame: transport::InboundFrame,
    ) {
        match frame.kind {
            ApciKind::IFrame { .. } => {
                connection.set_recv_seq(reader.recv_seq());
                connection.send_ack(reader.recv_seq()).await;

                let Some(bytes) = frame.asdu_bytes else {
                    return;
                };
                let Some(header) = transport::parse_asdu_header(&bytes) else {
                    warn!(peer = %connection.peer_addr, "short or malformed inbound ASDU");
                    return;
                };
                let qualifier = bytes.get(9).copied().unwrap_or(DEFAULT_QOI);
                connection.handle_command(header, qualifier).await;
            }
            ApciKind::SFrame { .. } => {}
            ApciKind::UFrame(_) => {
                // STARTDT/STOPDT/TESTFR activation -- acknowledged implicitly
                // by this gateway's immediate-ack framing; no distinct
                // confirmation frame is sent since no windowing state exists
                // to start or stop.
            }
        }
    }

    /// Unregisters the broadcast callback, stops accepting new connections,
    /// and closes every active one. Idempotent: a second call finds nothing
    /// left to tear down.
    pub async fn deactivate(&self) {
        if let Some(id) = self.listener_id.lock().take() {
            self.store.remove_listener(id);
        }
        if let Some(handle) = self.accept_handle.lock().take() {
            handle.abort();
        }
        for conn in self.admission.snapshot().iter() {
            conn.close();
        }
    }

    pub fn active_connections(&self) -> usize {
        self.admission.len()
    }
}

/// The point store listener that drives spontaneous broadcast. Registered
/// once at `activate()`, it runs inside the dispatcher's bounded worker
/// pool: the actual per-connection sends happen here, awaited, so the
/// semaphore permit the dispatcher holds for this invocation stays held
/// for as long as the network writes take. Nothing here spawns its own
/// unbounded task.
struct BroadcastListener {
    admission: Arc<AdmissionTable>,
}

#[async_trait]
impl PointListener for BroadcastListener {
    async fn on_point(&self, point: &Point) {
        let active = self.admission.snapshot();
        if active.is_empty() {
            info!(ioa = point.ioa, "no active connections, skipping broadcast");
            return;
        }

        for conn in active.iter() {
            if !conn.send_spontaneous(point).await && !conn.is_active() {
                self.admission.remove(conn);
            }
        }
    }
}

/// Builds the listening `TcpListener` with the configured backlog. Tokio's
/// own `TcpListener::bind` always uses the platform's default backlog with
/// no way to override it, so the socket is built and listened on via
/// `socket2` first and handed to tokio as a pre-bound std socket.
fn bind_listener(addr: &str, backlog: u32) -> Result<TcpListener, ServerError> {
    let sock_addr: SocketAddr = addr.parse().map_err(|e| {
        ServerError::BindFailed(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;

    let domain = if sock_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None).map_err(ServerError::BindFailed)?;
    socket.set_reuse_address(true).map_err(ServerError::BindFailed)?;
    socket.bind(&sock_addr.into()).map_err(ServerError::BindFailed)?;
    socket
        .listen(backlog as i32)
        .map_err(ServerError::BindFailed)?;
    socket.set_nonblocking(true).map_err(ServerError::BindFailed)?;

    TcpListener::from_std(socket.into()).map_err(ServerError::BindFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn activate_binds_ephemeral_port_and_is_not_reentrant() {
        let mut cfg = GatewayConfig::default();
        cfg.bind_address = "127.0.0.1".to_string();
        cfg.port = 0;
        let store = PointStore::new(cfg.clone());
        let server = Server::new(store.clone(), cfg);

        server.activate().await.unwrap();
        let err = server.activate().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyActive));

        server.deactivate().await;
        store.shutdown().await;
    }

    #[tokio::test]
    async fn bind_listener_honours_configured_backlog() {
        let listener = bind_listener("127.0.0.1:0", 10).unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn deactivate_closes_active_connections() {
        let mut cfg = GatewayConfig::default();
        cfg.bind_address = "127.0.0.1".to_string();
        cfg.port = 0;
        let store = PointStore::new(cfg.clone());
        let server = Server::new(store.clone(), cfg);
        server.activate().await.unwrap();

        let conn = Connection::for_test(store.clone(), "127.0.0.1:9".parse().unwrap());
        assert!(server.admission.try_admit(conn.clone()));
        assert_eq!(server.active_connections(), 1);

        server.deactivate().await;
        assert_eq!(conn.state(), connection::ConnectionState::Closed);

        store.shutdown().await;
    }
}
