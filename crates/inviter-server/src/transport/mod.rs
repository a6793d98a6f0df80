//! Daemon transport: WebSocket over plain TCP.

pub mod websocket;

pub use websocket::{accept_daemon, bind, start_listener, DaemonConnection};
