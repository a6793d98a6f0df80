//! Daemon protocol message types.
//!
//! Every frame is a JSON object tagged by its `cmd` field and correlated by a
//! UUID `id`. Server frames are produced here with serde; daemon frames are
//! untrusted and go through [`crate::codec::decode_inbound`] instead.

use crate::error::DaemonErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The closed set of command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonCmd {
    /// Announcement text, optionally with a clipboard payload.
    Message,
    /// Query for the game currently running on the daemon's machine.
    GameId,
    /// Query for an invite link to a specific game.
    Link,
    /// Ask the daemon to shut down.
    Exit,
    /// Daemon-reported failure of a request.
    Error,
}

impl DaemonCmd {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::GameId => "game",
            Self::Link => "link",
            Self::Exit => "exit",
            Self::Error => "error",
        }
    }

    /// Parse a wire tag. `gameId` is accepted as an alias of `game`.
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "message" => Some(Self::Message),
            "game" | "gameId" => Some(Self::GameId),
            "link" => Some(Self::Link),
            "exit" => Some(Self::Exit),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for DaemonCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The chat user on whose behalf a request is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUser {
    pub id: String,
    pub name: String,
}

impl RequestUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Frames sent from the server to a daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    Message {
        id: Uuid,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        copy: Option<String>,
    },
    #[serde(rename = "game", alias = "gameId")]
    GameId { id: Uuid, user: RequestUser },
    #[serde(rename = "link")]
    Link {
        id: Uuid,
        user: RequestUser,
        game: u64,
    },
    #[serde(rename = "exit")]
    Exit { id: Uuid },
}

impl ServerMessage {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Message { id, .. }
            | Self::GameId { id, .. }
            | Self::Link { id, .. }
            | Self::Exit { id } => *id,
        }
    }

    pub fn cmd(&self) -> DaemonCmd {
        match self {
            Self::Message { .. } => DaemonCmd::Message,
            Self::GameId { .. } => DaemonCmd::GameId,
            Self::Link { .. } => DaemonCmd::Link,
            Self::Exit { .. } => DaemonCmd::Exit,
        }
    }
}

/// Request kinds that expect a correlated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GameId,
    Link,
}

impl RequestKind {
    pub fn cmd(&self) -> DaemonCmd {
        match self {
            Self::GameId => DaemonCmd::GameId,
            Self::Link => DaemonCmd::Link,
        }
    }
}

/// A successful, well-formed daemon response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonResponse {
    /// `game` response carrying a numeric game id.
    GameId(u64),
    /// `link` response carrying an invite URL.
    Link(String),
}

impl DaemonResponse {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::GameId(_) => RequestKind::GameId,
            Self::Link(_) => RequestKind::Link,
        }
    }
}

/// A decoded daemon frame that can be correlated to a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub id: Uuid,
    pub body: InboundBody,
}

/// What a correlated daemon frame carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundBody {
    /// A response with a valid payload for its tag.
    Response(DaemonResponse),
    /// An explicit error frame.
    Error(DaemonErrorCode),
    /// Unknown tag, a server-only tag, or a missing/mistyped payload field.
    Invalid,
}
