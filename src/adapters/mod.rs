//! Ingress adapters: translate raw samples from a field-side protocol into
//! `Point`s and publish them via `PointStore::update`.
//!
//! The actual 61850 and Modbus client libraries that deliver typed sample
//! records live outside this crate; these adapters demonstrate the ingress
//! contract in §6 against stand-in raw-sample types rather than wrapping a
//! real driver crate.

pub mod iec61850;
pub mod modbus;

use std::sync::Arc;

use crate::mapping::MappingTable;
use crate::store::PointStore;

/// Shared plumbing every adapter needs: the mapping table to resolve a
/// channel id to 104 addressing, and the store to publish into.
pub struct AdapterContext {
    pub mapping: Arc<MappingTable>,
    pub store: Arc<PointStore>,
}

impl AdapterContext {
    pub fn new(mapping: Arc<MappingTable>, store: Arc<PointStore>) -> Self {
        Self { mapping, store }
    }
}
