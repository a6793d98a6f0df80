use std::fmt;
use thiserror::Error;

/// Error codes a daemon may report in an `error` frame.
///
/// Daemons are versioned independently of the server, so any code this
/// server does not know maps to [`DaemonErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonErrorCode {
    /// The daemon did not understand the command.
    InvalidCmd,
    /// No running game could be resolved on the daemon side.
    InvalidApp,
    /// Any code this server does not recognize.
    Unknown,
}

impl DaemonErrorCode {
    /// Map a wire code to a known error, falling back to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "invalid_cmd" => Self::InvalidCmd,
            "invalid_app" => Self::InvalidApp,
            _ => Self::Unknown,
        }
    }

    /// The wire spelling of this code.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::InvalidCmd => "invalid_cmd",
            Self::InvalidApp => "invalid_app",
            Self::Unknown => "unknown",
        }
    }

    /// Translation key for this code.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::InvalidCmd => "error.daemon_invalid_cmd",
            Self::InvalidApp => "error.daemon_invalid_app",
            Self::Unknown => "error.daemon_unknown",
        }
    }
}

impl fmt::Display for DaemonErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Errors produced by the daemon session protocol.
///
/// This is the closed taxonomy every request to a daemon resolves into.
/// Each variant carries a translation key so a presentation layer can
/// localize it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InviterError {
    #[error("failed to send request to daemon")]
    SendRequest,

    #[error("daemon sent a frame that is not valid JSON")]
    InvalidResponseJson,

    #[error("daemon response is missing required fields")]
    InvalidResponseMessage,

    #[error("daemon responded with an unexpected command")]
    InvalidResponseType,

    #[error("daemon reported error: {0}")]
    Daemon(DaemonErrorCode),

    #[error("daemon connection closed: {reason}")]
    ConnectionClosed { reason: String },

    #[error("daemon did not respond in time")]
    Timeout,
}

impl InviterError {
    /// Teardown error carrying the closure reason.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Translation key for this error.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::SendRequest => "error.send_request_failed",
            Self::InvalidResponseJson => "error.invalid_response_json",
            Self::InvalidResponseMessage => "error.invalid_response_message",
            Self::InvalidResponseType => "error.invalid_response_type",
            Self::Daemon(code) => code.message_key(),
            Self::ConnectionClosed { .. } => "error.daemon_disconnected",
            Self::Timeout => "error.request_timeout",
        }
    }

    /// Replacement parameters for the translated message.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::ConnectionClosed { reason } => vec![("reason", reason.clone())],
            _ => Vec::new(),
        }
    }

    /// Whether this error tears down the whole connection rather than a
    /// single request.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::InvalidResponseJson)
    }
}

pub type InviterResult<T> = Result<T, InviterError>;
