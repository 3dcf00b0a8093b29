//! # iec104-gateway
//!
//! A protocol-translation gateway: it ingests telemetry from IEC 61850
//! reports and Modbus holding registers, normalises it into a canonical
//! [`point::Point`] record, retains the latest value per addressable point
//! in a concurrent, coalescing [`store::PointStore`], and republishes it to
//! IEC 60870-5-104 SCADA masters over [`server::Server`].
//!
//! ## Data flow
//!
//! Ingress adapters ([`adapters::iec61850`], [`adapters::modbus`]) resolve a
//! source channel id against the [`mapping::MappingTable`], construct a
//! [`point::Point`], and call [`store::PointStore::update`]. The store
//! coalesces bursts of updates to the same point and, on a fixed batch
//! interval, fans the latest value out to every registered listener. The
//! 104 server is one such listener: on each delivered point it asks
//! [`asdu::build_asdu`] for a SPONTANEOUS ASDU and broadcasts it to every
//! active client connection. Each connection separately answers General
//! Interrogation by snapshotting the store and sending one ASDU per point.
//!
//! ## Out of scope
//!
//! The upstream 61850/Modbus client libraries, the static mapping
//! configuration's persistence layer, and the 104 link-layer framing
//! (k/w windowing, S/U frame retransmission, the t1/t2/t3 timers) are all
//! treated as external collaborators; [`server::transport`] stands in for
//! the latter with a minimal APCI framer sufficient to exercise the
//! ASDU-level contract this crate owns.

pub mod adapters;
pub mod asdu;
pub mod config;
pub mod error;
pub mod mapping;
pub mod point;
pub mod server;
pub mod store;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use mapping::MappingTable;
pub use point::{Point, PointValue};
pub use server::Server;
pub use store::PointStore;
