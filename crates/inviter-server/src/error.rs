use thiserror::Error;

/// Process-level failures of the relay server.
///
/// These never reach a daemon request caller; request methods only return
/// [`inviter_core::InviterError`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("binding store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::Store(e.to_string())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
