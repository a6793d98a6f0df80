//! WebSocket listener using tokio-tungstenite.
//!
//! The daemon handshake is validated inside the HTTP upgrade callback, so a
//! rejected daemon gets a plain HTTP error response and is never upgraded.

use crate::error::{ServerError, ServerResult};
use crate::handshake::{rejection_response, HandshakeParams, HandshakePolicy};
use inviter_core::HandshakeError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// An upgraded daemon connection that passed the handshake.
pub struct DaemonConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    pub handshake: HandshakeParams,
}

/// Bind the TCP listener for daemon connections.
pub async fn bind(addr: SocketAddr) -> ServerResult<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Transport(format!("WS bind failed: {e}")))?;
    info!(addr = %addr, "WebSocket listener started");
    Ok(listener)
}

/// Run the accept loop on `listener`.
///
/// Returns a receiver that yields connections which completed the handshake.
pub fn start_listener(
    listener: TcpListener,
    policy: Arc<HandshakePolicy>,
) -> mpsc::Receiver<DaemonConnection> {
    let (tx, rx) = mpsc::channel::<DaemonConnection>(64);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let policy = policy.clone();
                    tokio::spawn(async move {
                        match accept_daemon(stream, addr, &policy).await {
                            Ok(Some(conn)) => {
                                if tx.send(conn).await.is_err() {
                                    warn!("daemon connection channel closed");
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                debug!(remote = %addr, error = %e, "WebSocket upgrade failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
            if tx.is_closed() {
                debug!("connection receiver dropped, stopping accept loop");
                break;
            }
        }
    });

    rx
}

/// Upgrade one TCP stream, validating the handshake on the way.
///
/// `Ok(None)` means the daemon was refused; the rejection has already been
/// written to the socket.
pub async fn accept_daemon(
    stream: TcpStream,
    remote_addr: SocketAddr,
    policy: &HandshakePolicy,
) -> ServerResult<Option<DaemonConnection>> {
    let mut outcome: Option<Result<HandshakeParams, HandshakeError>> = None;

    let callback = |request: &Request, response: Response| {
        let result = policy.validate(request.uri().query());
        let reply = match &result {
            Ok(_) => Ok(response),
            Err(e) => Err(rejection_response(e)),
        };
        outcome = Some(result);
        reply
    };
    let upgraded = tokio_tungstenite::accept_hdr_async(stream, callback).await;

    match (upgraded, outcome) {
        (_, Some(Err(rejection))) => {
            info!(remote = %remote_addr, error = rejection.code(), "daemon handshake rejected");
            Ok(None)
        }
        (Ok(ws_stream), Some(Ok(handshake))) => Ok(Some(DaemonConnection {
            ws_stream,
            remote_addr,
            handshake,
        })),
        (Ok(_), None) => Err(ServerError::Transport(
            "upgrade completed without a handshake".into(),
        )),
        (Err(e), _) => Err(ServerError::Transport(format!("WS upgrade failed: {e}"))),
    }
}
