//! Handshake rejection contract.
//!
//! A daemon that fails validation never gets upgraded; it receives one of
//! these errors serialized as [`ConnectionErrorBody`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Response header carrying the JSON rejection body.
pub const ERROR_HEADER: &str = "X-Daemon-Error";

/// Maximum length of a daemon token.
pub const MAX_TOKEN_LEN: usize = 36;

/// Why a connection attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("missing or malformed protocol version")]
    InvalidVersion,

    #[error("daemon is outdated, version {required} or newer is required")]
    Outdated { required: String, download: String },

    #[error("missing or malformed daemon token")]
    InvalidToken,

    #[error("missing or malformed session identifier")]
    InvalidSession,
}

impl HandshakeError {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidVersion => "invalid_version",
            Self::Outdated { .. } => "outdated",
            Self::InvalidToken => "invalid_token",
            Self::InvalidSession => "invalid_session",
        }
    }

    /// HTTP status for the refused upgrade.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidVersion | Self::InvalidSession => 400,
            Self::InvalidToken => 401,
            Self::Outdated { .. } => 426,
        }
    }

    /// Translation key for this error.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::InvalidVersion => "error.handshake_invalid_version",
            Self::Outdated { .. } => "error.handshake_outdated",
            Self::InvalidToken => "error.handshake_invalid_token",
            Self::InvalidSession => "error.handshake_invalid_session",
        }
    }

    pub fn to_body(&self) -> ConnectionErrorBody {
        let (required, download) = match self {
            Self::Outdated { required, download } => (Some(required.clone()), Some(download.clone())),
            _ => (None, None),
        };
        ConnectionErrorBody {
            error: self.code().to_string(),
            message: Some(self.to_string()),
            required,
            download,
        }
    }
}

/// JSON body sent with a refused upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outdated_body_carries_upgrade_hints() {
        let err = HandshakeError::Outdated {
            required: "1.0.0".into(),
            download: "https://example/download".into(),
        };
        let json = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(json["error"], "outdated");
        assert_eq!(json["required"], "1.0.0");
        assert_eq!(json["download"], "https://example/download");
        assert_eq!(err.status(), 426);
    }

    #[test]
    fn other_bodies_omit_upgrade_hints() {
        for err in [
            HandshakeError::InvalidVersion,
            HandshakeError::InvalidToken,
            HandshakeError::InvalidSession,
        ] {
            let json = serde_json::to_value(err.to_body()).unwrap();
            assert_eq!(json["error"], err.code());
            assert!(json.get("required").is_none());
            assert!(json.get("download").is_none());
        }
    }
}
