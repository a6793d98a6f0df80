//! Connection wrapper for one live daemon.
//!
//! `DaemonClient` encodes outbound requests, settles pending requests from
//! inbound frames and exposes the typed request API used by the command
//! layer. It does not touch the socket itself: outbound frames go through an
//! mpsc channel and close requests through a watch channel, both drained by
//! the gateway's session loop for this connection.

use super::pending::PendingTable;
use inviter_core::{
    decode_inbound, encode_server_message, DaemonResponse, InboundBody, InboundFrame,
    InviterError, InviterResult, ProtocolVersion, RequestKind, RequestUser, ServerMessage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound frame queue depth per connection.
const OUTBOUND_QUEUE: usize = 64;

/// Identity of a daemon connection, fixed at handshake.
#[derive(Debug, Clone)]
pub struct DaemonSession {
    /// Daemon id (the handshake token).
    pub daemon_id: String,
    /// Protocol version the daemon announced.
    pub version: ProtocolVersion,
    /// Game session the daemon is attached to.
    pub session_id: i64,
    /// Server-assigned id distinguishing reconnects of the same daemon.
    pub connection_id: u64,
    pub connected_at: Instant,
}

/// An encoded text frame waiting for the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    pub text: String,
    /// Set when the frame is a request awaiting a response.
    pub request_id: Option<Uuid>,
}

/// Receiving ends wired to the transport by the session loop.
pub struct ClientChannels {
    /// Encoded frames to write to the socket.
    pub outbound: mpsc::Receiver<OutboundFrame>,
    /// Becomes `Some(reason)` once the client is closed.
    pub close: watch::Receiver<Option<String>>,
}

/// A live daemon connection.
pub struct DaemonClient {
    session: DaemonSession,
    outbound: mpsc::Sender<OutboundFrame>,
    close_tx: watch::Sender<Option<String>>,
    pending: Mutex<PendingTable>,
    closed: AtomicBool,
    request_timeout: Option<Duration>,
}

impl DaemonClient {
    /// Create a client and the channel ends its session loop must drain.
    pub fn new(session: DaemonSession, request_timeout: Option<Duration>) -> (Self, ClientChannels) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (close_tx, close_rx) = watch::channel(None);
        let client = Self {
            session,
            outbound,
            close_tx,
            pending: Mutex::new(PendingTable::new()),
            closed: AtomicBool::new(false),
            request_timeout,
        };
        let channels = ClientChannels {
            outbound: outbound_rx,
            close: close_rx,
        };
        (client, channels)
    }

    pub fn session(&self) -> &DaemonSession {
        &self.session
    }

    pub fn daemon_id(&self) -> &str {
        &self.session.daemon_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of requests still waiting for the daemon.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Ask the daemon for an invite link to `game_id`.
    pub async fn request_link(&self, user: &RequestUser, game_id: u64) -> InviterResult<String> {
        let user = user.clone();
        let response = self
            .request(RequestKind::Link, |id| ServerMessage::Link {
                id,
                user,
                game: game_id,
            })
            .await?;
        match response {
            DaemonResponse::Link(url) => Ok(url),
            DaemonResponse::GameId(_) => Err(InviterError::InvalidResponseType),
        }
    }

    /// Ask the daemon which game is currently running.
    pub async fn request_game_id(&self, user: &RequestUser) -> InviterResult<u64> {
        let user = user.clone();
        let response = self
            .request(RequestKind::GameId, |id| ServerMessage::GameId { id, user })
            .await?;
        match response {
            DaemonResponse::GameId(game) => Ok(game),
            DaemonResponse::Link(_) => Err(InviterError::InvalidResponseType),
        }
    }

    /// Show a message on the daemon, optionally with text to copy.
    ///
    /// Best effort: send failures are logged and dropped.
    pub async fn send_announcement(&self, text: &str, copy: Option<&str>) {
        self.notify(ServerMessage::Message {
            id: Uuid::new_v4(),
            text: text.to_string(),
            copy: copy.map(str::to_string),
        })
        .await;
    }

    /// Ask the daemon process to exit. Best effort, like announcements.
    pub async fn request_exit(&self) {
        self.notify(ServerMessage::Exit { id: Uuid::new_v4() }).await;
    }

    /// Handle one inbound text frame from the daemon.
    ///
    /// Never fails: a frame that is not JSON closes the connection, anything
    /// else settles at most the one request it names.
    pub async fn process_inbound_frame(&self, raw: &str) {
        let frame = match decode_inbound(raw) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(daemon_id = %self.session.daemon_id, "discarding frame without request id");
                return;
            }
            Err(error) if error.is_connection_fatal() => {
                warn!(
                    daemon_id = %self.session.daemon_id,
                    error = %error,
                    "daemon sent unparseable frame, closing connection"
                );
                self.shutdown("invalid JSON from daemon", error).await;
                return;
            }
            Err(error) => {
                debug!(daemon_id = %self.session.daemon_id, error = %error, "discarding undecodable frame");
                return;
            }
        };

        let InboundFrame { id, body } = frame;
        let mut pending = self.pending.lock().await;
        let settled = match body {
            InboundBody::Response(response) => pending.resolve(id, response),
            InboundBody::Error(code) => {
                debug!(daemon_id = %self.session.daemon_id, request_id = %id, code = %code, "daemon reported error");
                pending.reject_one(id, InviterError::Daemon(code))
            }
            InboundBody::Invalid => {
                warn!(daemon_id = %self.session.daemon_id, request_id = %id, "daemon sent malformed response");
                pending.reject_one(id, InviterError::InvalidResponseMessage)
            }
        };
        if !settled {
            debug!(daemon_id = %self.session.daemon_id, request_id = %id, "no pending request for frame");
        }
    }

    /// Fail the request whose frame could not be written to the socket.
    ///
    /// Returns whether the request was still pending.
    pub async fn fail_send(&self, request_id: Uuid) -> bool {
        let failed = self
            .pending
            .lock()
            .await
            .reject_one(request_id, InviterError::SendRequest);
        if failed {
            warn!(daemon_id = %self.session.daemon_id, request_id = %request_id, "failed to write request");
        }
        failed
    }

    /// Close the connection and fail every outstanding request. Idempotent.
    pub async fn close(&self, reason: &str) {
        self.shutdown(reason, InviterError::closed(reason)).await;
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn shutdown(&self, reason: &str, error: InviterError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let rejected = self.pending.lock().await.reject_all(&error);
        self.close_tx.send_replace(Some(reason.to_string()));
        info!(
            daemon_id = %self.session.daemon_id,
            connection_id = self.session.connection_id,
            reason,
            rejected,
            "daemon client closed"
        );
    }

    async fn request(
        &self,
        kind: RequestKind,
        build: impl FnOnce(Uuid) -> ServerMessage,
    ) -> InviterResult<DaemonResponse> {
        let (id, mut completion) = {
            let mut pending = self.pending.lock().await;
            // Checked under the lock so a concurrent close cannot miss this entry.
            if self.is_closed() {
                return Err(InviterError::closed("connection already closed"));
            }
            pending.issue(kind)
        };

        let sent = match encode_server_message(&build(id)) {
            Ok(text) => self
                .outbound
                .send(OutboundFrame {
                    text,
                    request_id: Some(id),
                })
                .await
                .is_ok(),
            Err(_) => false,
        };
        if !sent {
            warn!(daemon_id = %self.session.daemon_id, request_id = %id, "failed to send request");
            self.pending
                .lock()
                .await
                .reject_one(id, InviterError::SendRequest);
        } else {
            debug!(daemon_id = %self.session.daemon_id, request_id = %id, cmd = %kind.cmd(), "request sent");
        }

        let outcome = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut completion).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending
                        .lock()
                        .await
                        .reject_one(id, InviterError::Timeout);
                    completion.await
                }
            },
            None => completion.await,
        };

        // The table always settles before dropping a sender.
        outcome.unwrap_or_else(|_| Err(InviterError::closed("request abandoned")))
    }

    async fn notify(&self, message: ServerMessage) {
        if self.is_closed() {
            debug!(daemon_id = %self.session.daemon_id, cmd = %message.cmd(), "skipping notification on closed client");
            return;
        }
        let text = match encode_server_message(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode notification");
                return;
            }
        };
        let frame = OutboundFrame {
            text,
            request_id: None,
        };
        if self.outbound.send(frame).await.is_err() {
            debug!(
                daemon_id = %self.session.daemon_id,
                message_id = %message.id(),
                cmd = %message.cmd(),
                "notification dropped, connection gone"
            );
        }
    }
}
