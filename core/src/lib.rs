//! Core types and shared plumbing for the lanwatch inventory engine.

pub mod gate;
pub mod model;
pub mod store;

pub use gate::{should_probe_ports, unix_seconds, IntervalGate, ScanStateMarker};
pub use model::{
    DiscoverySet, HistoryEvent, HostMutation, HostRecord, HostRefresh, HostStatus, MutationBatch, Snapshot,
};
pub use store::InventoryStore;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
