//! Daemon handshake validation.
//!
//! The handshake rides on the upgrade request's query string:
//! `?token=<daemon id>&v=<semver>&session=<integer>`. Checks run in order and
//! stop at the first failure:
//! 1. `v` is a semantic version
//! 2. `v` is at least the configured minimum
//! 3. `token` is non-empty and at most 36 characters
//! 4. `session` is an integer

use crate::i18n::{self, DEFAULT_LOCALE};
use inviter_core::handshake::{ERROR_HEADER, MAX_TOKEN_LEN};
use inviter_core::{HandshakeError, ProtocolVersion};
use std::borrow::Cow;
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::http::{Response, StatusCode};
use tracing::debug;

/// A validated handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    pub daemon_id: String,
    pub version: ProtocolVersion,
    pub session_id: i64,
}

/// What the server requires from connecting daemons.
#[derive(Debug, Clone)]
pub struct HandshakePolicy {
    pub required_version: ProtocolVersion,
    pub download_url: String,
}

impl HandshakePolicy {
    /// Validate an upgrade request's query string.
    pub fn validate(&self, query: Option<&str>) -> Result<HandshakeParams, HandshakeError> {
        let params = QueryParams::parse(query.unwrap_or_default());

        let version = params
            .get("v")
            .and_then(|v| v.parse::<ProtocolVersion>().ok())
            .ok_or(HandshakeError::InvalidVersion)?;

        if !version.satisfies(&self.required_version) {
            return Err(HandshakeError::Outdated {
                required: self.required_version.to_string(),
                download: self.download_url.clone(),
            });
        }

        let daemon_id = params
            .get("token")
            .filter(|token| !token.is_empty() && token.chars().count() <= MAX_TOKEN_LEN)
            .ok_or(HandshakeError::InvalidToken)?
            .to_string();

        let session_id = params
            .get("session")
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(HandshakeError::InvalidSession)?;

        debug!(daemon_id = %daemon_id, version = %version, session_id, "handshake accepted");
        Ok(HandshakeParams {
            daemon_id,
            version,
            session_id,
        })
    }
}

/// Decoded query parameters; the first occurrence of a key wins.
struct QueryParams<'a> {
    pairs: Vec<(Cow<'a, str>, Cow<'a, str>)>,
}

impl<'a> QueryParams<'a> {
    fn parse(query: &'a str) -> Self {
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes()).collect(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }
}

/// Build the HTTP response refusing an upgrade.
///
/// The JSON body goes both in the [`ERROR_HEADER`] header and the body.
pub fn rejection_response(error: &HandshakeError) -> ErrorResponse {
    let status = StatusCode::from_u16(error.status()).unwrap_or(StatusCode::BAD_REQUEST);
    let mut body = error.to_body();
    body.message = Some(i18n::translate_handshake_error(error, DEFAULT_LOCALE));
    let body = serde_json::to_string(&body).unwrap_or_default();

    Response::builder()
        .status(status)
        .header(ERROR_HEADER, body.as_str())
        .body(Some(body))
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(None);
            *fallback.status_mut() = status;
            fallback
        })
}
