//! Daemon gateway: accepts daemon connections and runs their lifecycle.
//!
//! Per connection: handshake (in the transport) → register in the
//! [`DaemonManager`] → greet → session loop (frames, keepalive, close
//! requests) → unregister and close. The teardown step runs however the
//! session loop ends.

use crate::config::ServerConfig;
use crate::daemon::{ClientChannels, DaemonClient};
use crate::error::ServerResult;
use crate::handshake::HandshakePolicy;
use crate::i18n::{self, DEFAULT_LOCALE};
use crate::registry::DaemonManager;
use crate::transport::{websocket, DaemonConnection};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

/// Chat command a user runs to link a daemon, pre-filled for the clipboard.
pub fn link_command(daemon_id: &str) -> String {
    format!("/steam setup client_id:{daemon_id}")
}

/// The daemon gateway.
pub struct DaemonServer {
    config: ServerConfig,
    policy: Arc<HandshakePolicy>,
    manager: Arc<DaemonManager>,
}

impl DaemonServer {
    /// Create a gateway feeding `manager`.
    pub fn new(config: ServerConfig, manager: Arc<DaemonManager>) -> Self {
        let policy = Arc::new(HandshakePolicy {
            required_version: config.required_version.clone(),
            download_url: config.download_url.clone(),
        });
        Self {
            config,
            policy,
            manager,
        }
    }

    /// The registry shared with the command layer.
    pub fn manager(&self) -> &Arc<DaemonManager> {
        &self.manager
    }

    /// Bind the configured address and serve until the listener stops.
    pub async fn run(self: Arc<Self>) -> ServerResult<()> {
        let listener = websocket::bind(self.config.listen_addr()).await?;
        self.serve(listener).await
    }

    /// Serve daemons on an already bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> ServerResult<()> {
        let mut connections = websocket::start_listener(listener, self.policy.clone());

        let stats = self
            .config
            .stats_interval
            .map(|interval| spawn_stats(self.manager.clone(), interval));

        info!(
            required_version = %self.config.required_version,
            keepalive_ms = self.config.keepalive_interval.as_millis() as u64,
            "daemon server ready"
        );

        while let Some(conn) = connections.recv().await {
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(conn).await;
            });
        }

        if let Some(stats) = stats {
            stats.abort();
        }
        info!("daemon listener closed");
        Ok(())
    }

    /// Close every connected daemon and wait up to `grace` for their
    /// session loops to unregister them.
    pub async fn shutdown(&self, grace: Duration) {
        let daemons = self.manager.connected_daemons().await;
        info!(count = daemons.len(), "closing daemon connections");
        for client in &daemons {
            client.close("server shutdown").await;
        }

        let deadline = Instant::now() + grace;
        while self.manager.daemon_count().await > 0 && Instant::now() < deadline {
            time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn handle_connection(&self, conn: DaemonConnection) {
        let DaemonConnection {
            ws_stream,
            remote_addr,
            handshake,
        } = conn;

        let (client, channels) = self
            .manager
            .register_daemon(&handshake.daemon_id, handshake.version, handshake.session_id)
            .await;
        info!(
            remote = %remote_addr,
            daemon_id = %client.daemon_id(),
            connection_id = client.session().connection_id,
            "daemon connected"
        );

        tokio::spawn(greet(self.manager.clone(), client.clone()));

        let (sink, stream) = ws_stream.split();
        let reason = session_loop(sink, stream, &client, channels, self.config.keepalive_interval).await;

        self.manager.unregister_connection(&client).await;
        client.close(&reason).await;
        info!(
            daemon_id = %client.daemon_id(),
            connection_id = client.session().connection_id,
            connected_secs = client.session().connected_at.elapsed().as_secs(),
            reason = %reason,
            "daemon disconnected"
        );
    }
}

/// Send the first notification to a freshly connected daemon.
///
/// A bound daemon is welcomed by its user's name; an unbound one gets the
/// linking command to paste into chat.
async fn greet(manager: Arc<DaemonManager>, client: Arc<DaemonClient>) {
    match manager.get_binding_for_daemon(client.daemon_id()).await {
        Ok(Some(binding)) => {
            let text = i18n::translate(
                "daemon.welcome",
                &binding.locale,
                &[("user", binding.user_name.clone())],
            );
            client.send_announcement(&text, None).await;
            if let Err(e) = manager
                .record_daemon_version(binding, &client.session().version)
                .await
            {
                warn!(daemon_id = %client.daemon_id(), error = %e, "failed to record daemon version");
            }
        }
        Ok(None) => {
            let text = i18n::translate("daemon.link_account", DEFAULT_LOCALE, &[]);
            let command = link_command(client.daemon_id());
            client.send_announcement(&text, Some(&command)).await;
        }
        Err(e) => {
            warn!(daemon_id = %client.daemon_id(), error = %e, "binding lookup failed");
        }
    }
}

/// Pump frames between the socket and `client` until the connection ends.
///
/// Returns the reason the connection ended. A request whose frame cannot be
/// written fails with a send error before the connection is torn down.
async fn session_loop<Si, St>(
    mut sink: Si,
    mut stream: St,
    client: &DaemonClient,
    mut channels: ClientChannels,
    keepalive: Duration,
) -> String
where
    Si: Sink<Message, Error = WsError> + Unpin,
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut ticker = time::interval_at(Instant::now() + keepalive, keepalive);
    let mut pong_received = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !pong_received {
                    warn!(daemon_id = %client.daemon_id(), "no pong from daemon, terminating connection");
                    return "keepalive timeout".to_string();
                }
                pong_received = false;
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    return format!("ping failed: {e}");
                }
            }

            // Client closed (explicitly, superseded, or bad JSON)
            _ = channels.close.changed() => {
                let reason = channels
                    .close
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| "closed".to_string());
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.clone().into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(error = %e, "failed to send close frame");
                }
                return reason;
            }

            Some(frame) = channels.outbound.recv() => {
                debug!(daemon_id = %client.daemon_id(), request_id = ?frame.request_id, "sending frame");
                if let Err(e) = sink.send(Message::Text(frame.text.into())).await {
                    if let Some(request_id) = frame.request_id {
                        client.fail_send(request_id).await;
                    }
                    return format!("send failed: {e}");
                }
            }

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    debug!(daemon_id = %client.daemon_id(), "received frame");
                    client.process_inbound_frame(text.as_str()).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    pong_received = true;
                    debug!(daemon_id = %client.daemon_id(), "pong received");
                }
                Some(Ok(Message::Close(_))) | None => {
                    return "daemon disconnected".to_string();
                }
                // Binary frames are not part of the protocol; pings are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return format!("transport error: {e}");
                }
            }
        }
    }
}

/// Log connected daemon and linked user counts every `interval`.
fn spawn_stats(manager: Arc<DaemonManager>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.tick().await; // skip first immediate tick
        loop {
            ticker.tick().await;
            let daemons = manager.daemon_count().await;
            match manager.user_count().await {
                Ok(linked_users) => info!(daemons, linked_users, "stats"),
                Err(e) => warn!(daemons, error = %e, "stats: failed to count linked users"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryBindingStore;
    use inviter_core::handshake::ERROR_HEADER;
    use inviter_core::{DaemonErrorCode, InviterError, RequestUser};
    use serde_json::{json, Value};
    use crate::daemon::DaemonSession;
    use inviter_core::ProtocolVersion;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> ServerConfig {
        ServerConfig {
            keepalive_interval: Duration::from_secs(30),
            stats_interval: None,
            download_url: "https://example/download".to_string(),
            ..ServerConfig::default()
        }
    }

    async fn start(config: ServerConfig) -> (String, Arc<DaemonServer>) {
        let manager = Arc::new(DaemonManager::new(Arc::new(MemoryBindingStore::new()), None));
        let server = Arc::new(DaemonServer::new(config, manager));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.clone().serve(listener));
        (format!("ws://{addr}/"), server)
    }

    async fn connect(base: &str, query: &str) -> TestSocket {
        let (ws, _) = connect_async(format!("{base}?{query}")).await.unwrap();
        ws
    }

    /// Next text frame as JSON, skipping control frames.
    async fn next_json(ws: &mut TestSocket) -> Value {
        loop {
            let message = time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("transport error");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn send_json(ws: &mut TestSocket, value: Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition().await {
            assert!(Instant::now() < deadline, "condition not met in time");
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn outdated_daemon_is_rejected() {
        let (base, server) = start(test_config()).await;

        match connect_async(format!("{base}?token=abc&v=0.9.0&session=3")).await {
            Err(WsError::Http(response)) => {
                assert_eq!(response.status().as_u16(), 426);
                let header = response.headers().get(ERROR_HEADER).unwrap().to_str().unwrap();
                let body: Value = serde_json::from_str(header).unwrap();
                assert_eq!(body["error"], "outdated");
                assert_eq!(body["required"], "1.0.0");
                assert_eq!(body["download"], "https://example/download");
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("outdated daemon should be refused"),
        }
        assert_eq!(server.manager().daemon_count().await, 0);
        assert!(server.manager().get_daemon_from_id("abc").await.is_none());
    }

    #[tokio::test]
    async fn invalid_session_is_rejected() {
        let (base, server) = start(test_config()).await;
        match connect_async(format!("{base}?token=abc&v=1.2.0&session=x")).await {
            Err(WsError::Http(response)) => {
                assert_eq!(response.status().as_u16(), 400);
                let header = response.headers().get(ERROR_HEADER).unwrap().to_str().unwrap();
                assert!(header.contains("invalid_session"));
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("bad session should be refused"),
        }
        assert_eq!(server.manager().daemon_count().await, 0);
    }

    #[tokio::test]
    async fn valid_daemon_registers_and_gets_link_notice() {
        let (base, server) = start(test_config()).await;
        let mut ws = connect(&base, "token=abc&v=1.2.0&session=3").await;

        let notice = next_json(&mut ws).await;
        assert_eq!(notice["cmd"], "message");
        assert_eq!(notice["copy"], link_command("abc"));

        let client = server.manager().get_daemon_from_id("abc").await.unwrap();
        assert_eq!(client.session().session_id, 3);
        assert_eq!(client.session().version.to_string(), "1.2.0");
        assert_eq!(server.manager().daemon_count().await, 1);
    }

    #[tokio::test]
    async fn bound_daemon_is_welcomed_and_version_recorded() {
        let (base, server) = start(test_config()).await;
        server
            .manager()
            .bind_user(&RequestUser::new("42", "alice"), "abc", "en")
            .await
            .unwrap();

        let mut ws = connect(&base, "token=abc&v=1.3.0&session=1").await;
        let notice = next_json(&mut ws).await;
        assert_eq!(notice["cmd"], "message");
        assert!(notice["text"].as_str().unwrap().contains("alice"));
        assert!(notice.get("copy").is_none());

        let manager = server.manager().clone();
        wait_until(|| {
            let manager = manager.clone();
            async move {
                manager
                    .get_binding_for_daemon("abc")
                    .await
                    .unwrap()
                    .and_then(|b| b.daemon_version)
                    .as_deref()
                    == Some("1.3.0")
            }
        })
        .await;
    }

    #[tokio::test]
    async fn link_request_end_to_end() {
        let (base, server) = start(test_config()).await;
        let mut ws = connect(&base, "token=abc&v=1.2.0&session=3").await;
        next_json(&mut ws).await;

        let client = server.manager().get_daemon_from_id("abc").await.unwrap();
        let request = tokio::spawn(async move {
            client.request_link(&RequestUser::new("1", "alice"), 730).await
        });

        let query = next_json(&mut ws).await;
        assert_eq!(query["cmd"], "link");
        assert_eq!(query["game"], 730);
        send_json(
            &mut ws,
            json!({ "id": query["id"], "cmd": "link", "url": "https://example/invite/1" }),
        )
        .await;

        assert_eq!(
            request.await.unwrap(),
            Ok("https://example/invite/1".to_string())
        );
    }

    #[tokio::test]
    async fn daemon_error_end_to_end() {
        let (base, server) = start(test_config()).await;
        let mut ws = connect(&base, "token=abc&v=1.2.0&session=3").await;
        next_json(&mut ws).await;

        let client = server.manager().get_daemon_from_id("abc").await.unwrap();
        let request = tokio::spawn(async move {
            client.request_link(&RequestUser::new("1", "alice"), 730).await
        });

        let query = next_json(&mut ws).await;
        send_json(&mut ws, json!({ "id": query["id"], "cmd": "error", "code": "invalid_app" })).await;

        assert_eq!(
            request.await.unwrap(),
            Err(InviterError::Daemon(DaemonErrorCode::InvalidApp))
        );
        // Per-request errors leave the connection up.
        assert!(server.manager().get_daemon_from_id("abc").await.is_some());
    }

    #[tokio::test]
    async fn malformed_json_closes_connection() {
        let (base, server) = start(test_config()).await;
        let mut ws = connect(&base, "token=abc&v=1.2.0&session=3").await;
        next_json(&mut ws).await;

        let client = server.manager().get_daemon_from_id("abc").await.unwrap();
        let request = {
            let client = client.clone();
            tokio::spawn(async move { client.request_game_id(&RequestUser::new("1", "a")).await })
        };
        next_json(&mut ws).await;

        ws.send(Message::Text("{{{{".to_string().into())).await.unwrap();

        assert_eq!(request.await.unwrap(), Err(InviterError::InvalidResponseJson));
        let manager = server.manager().clone();
        wait_until(|| {
            let manager = manager.clone();
            async move { manager.get_daemon_from_id("abc").await.is_none() }
        })
        .await;
    }

    #[tokio::test]
    async fn disconnect_rejects_pending_and_unregisters() {
        let (base, server) = start(test_config()).await;
        let mut ws = connect(&base, "token=abc&v=1.2.0&session=3").await;
        next_json(&mut ws).await;

        let client = server.manager().get_daemon_from_id("abc").await.unwrap();
        let request = {
            let client = client.clone();
            tokio::spawn(async move { client.request_link(&RequestUser::new("1", "a"), 1).await })
        };
        next_json(&mut ws).await;

        ws.close(None).await.unwrap();

        assert!(matches!(
            request.await.unwrap(),
            Err(InviterError::ConnectionClosed { .. })
        ));
        let manager = server.manager().clone();
        wait_until(|| {
            let manager = manager.clone();
            async move { manager.daemon_count().await == 0 }
        })
        .await;
    }

    #[tokio::test]
    async fn socket_write_failure_is_a_send_error() {
        let session = DaemonSession {
            daemon_id: "abc".to_string(),
            version: ProtocolVersion::new(1, 2, 0),
            session_id: 3,
            connection_id: 1,
            connected_at: std::time::Instant::now(),
        };
        let (client, channels) = DaemonClient::new(session, None);
        let client = Arc::new(client);

        let broken = Box::pin(futures_util::sink::unfold((), |(), _message: Message| async {
            Err::<(), WsError>(WsError::ConnectionClosed)
        }));
        let silent = futures_util::stream::pending::<Result<Message, WsError>>();
        let pump = {
            let client = client.clone();
            tokio::spawn(async move {
                session_loop(broken, silent, &client, channels, Duration::from_secs(30)).await
            })
        };

        let result = client.request_link(&RequestUser::new("1", "alice"), 730).await;
        assert_eq!(result, Err(InviterError::SendRequest));
        assert!(pump.await.unwrap().starts_with("send failed"));
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn silent_daemon_is_terminated_by_keepalive() {
        let config = ServerConfig {
            keepalive_interval: Duration::from_millis(50),
            ..test_config()
        };
        let (base, server) = start(config).await;
        let mut ws = connect(&base, "token=abc&v=1.2.0&session=3").await;
        next_json(&mut ws).await;
        assert!(server.manager().get_daemon_from_id("abc").await.is_some());

        // Stop reading: tungstenite only answers pings while the socket is polled.
        let manager = server.manager().clone();
        wait_until(|| {
            let manager = manager.clone();
            async move { manager.get_daemon_from_id("abc").await.is_none() }
        })
        .await;
        drop(ws);
    }

    #[tokio::test]
    async fn responsive_daemon_survives_keepalive() {
        let config = ServerConfig {
            keepalive_interval: Duration::from_millis(50),
            ..test_config()
        };
        let (base, server) = start(config).await;
        let mut ws = connect(&base, "token=abc&v=1.2.0&session=3").await;
        next_json(&mut ws).await;

        // Keep polling so pings get answered.
        let reader = tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
        time::sleep(Duration::from_millis(400)).await;
        assert!(server.manager().get_daemon_from_id("abc").await.is_some());
        reader.abort();
    }

    #[tokio::test]
    async fn reconnect_supersedes_old_connection() {
        let (base, server) = start(test_config()).await;
        let mut first = connect(&base, "token=abc&v=1.2.0&session=1").await;
        next_json(&mut first).await;
        let old = server.manager().get_daemon_from_id("abc").await.unwrap();

        let mut second = connect(&base, "token=abc&v=1.2.0&session=2").await;
        next_json(&mut second).await;

        let current = server.manager().get_daemon_from_id("abc").await.unwrap();
        assert_eq!(current.session().session_id, 2);
        assert!(old.is_closed());

        // The first socket is closed by the server; its teardown leaves the new entry alone.
        time::sleep(Duration::from_millis(100)).await;
        let current = server.manager().get_daemon_from_id("abc").await.unwrap();
        assert_eq!(current.session().session_id, 2);
    }

    #[tokio::test]
    async fn shutdown_closes_all_daemons() {
        let (base, server) = start(test_config()).await;
        let mut a = connect(&base, "token=a&v=1.2.0&session=1").await;
        let mut b = connect(&base, "token=b&v=1.2.0&session=1").await;
        next_json(&mut a).await;
        next_json(&mut b).await;
        assert_eq!(server.manager().daemon_count().await, 2);

        server.shutdown(Duration::from_secs(2)).await;
        assert_eq!(server.manager().daemon_count().await, 0);
    }
}
