//! inviter-server: relay between the chat-bot side and remote daemons.
//!
//! Daemons dial in over WebSocket, pass a query-string handshake, and are
//! then driven through a [`daemon::DaemonClient`] looked up in the
//! [`registry::DaemonManager`].

pub mod config;
pub mod daemon;
pub mod error;
pub mod handshake;
pub mod i18n;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::ServerConfig;
pub use daemon::{DaemonClient, DaemonSession};
pub use error::{ServerError, ServerResult};
pub use registry::{BindingStore, DaemonManager, JsonFileBindingStore, MemoryBindingStore, UserBinding};
pub use server::DaemonServer;
