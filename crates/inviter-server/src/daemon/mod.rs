//! Per-connection daemon state: the request table and the client wrapper.

pub mod client;
pub mod pending;

pub use client::{ClientChannels, DaemonClient, DaemonSession, OutboundFrame};
pub use pending::PendingTable;
