//! inviter-core: shared protocol library for the invite relay.
//!
//! Defines the JSON frames exchanged with daemons, the decoder for untrusted
//! daemon frames, the protocol error taxonomy and the handshake rejection
//! contract.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod messages;
pub mod version;

// Re-export commonly used items at crate root.
pub use codec::{decode_inbound, encode_server_message};
pub use error::{DaemonErrorCode, InviterError, InviterResult};
pub use handshake::{ConnectionErrorBody, HandshakeError};
pub use messages::{
    DaemonCmd, DaemonResponse, InboundBody, InboundFrame, RequestKind, RequestUser, ServerMessage,
};
pub use version::ProtocolVersion;
