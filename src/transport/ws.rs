use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::{GameRules, ServerHandle};
use crate::transport::{ConnectionProvider, SessionId};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use dashmap::DashMap;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Query parameters for the WebSocket upgrade.
#[derive(Deserialize)]
struct WsQuery {
    name: String,
}

/// Shared state for the WebSocket route.
struct WsState<R: GameRules> {
    server: ServerHandle<R>,
    /// Live sockets and when they connected.
    active: Arc<DashMap<String, Instant>>,
    shutdown: broadcast::Sender<()>,
}

impl<R: GameRules> Clone for WsState<R> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            active: Arc::clone(&self.active),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// WebSocket connection provider: one axum listener, one socket task per
/// client, JSON text frames both ways.
pub struct WebSocketProvider {
    listen_addr: String,
    active: Arc<DashMap<String, Instant>>,
    shutdown: broadcast::Sender<()>,
    stop_listener: Option<oneshot::Sender<()>>,
}

impl WebSocketProvider {
    pub fn new(listen_addr: &str) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            listen_addr: listen_addr.to_string(),
            active: Arc::new(DashMap::new()),
            shutdown,
            stop_listener: None,
        }
    }

    /// Number of currently-connected sockets.
    pub fn connection_count(&self) -> usize {
        self.active.len()
    }

    /// The axum router serving the upgrade route, bound to `server`.
    pub fn router<R: GameRules>(&self, server: ServerHandle<R>) -> Router {
        let state = WsState {
            server,
            active: Arc::clone(&self.active),
            shutdown: self.shutdown.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler::<R>))
            .with_state(state)
    }
}

impl<R: GameRules> ConnectionProvider<R> for WebSocketProvider {
    fn connect(&mut self, server: ServerHandle<R>) -> anyhow::Result<SessionId> {
        let addr: SocketAddr = self.listen_addr.parse()?;

        let app = self.router(server);

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_listener = Some(stop_tx);

        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(addr = %addr, error = %e, "failed to bind WebSocket listener");
                    return;
                }
            };

            info!(addr = %addr, "WebSocket transport listening");

            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = stop_rx.await;
            });

            if let Err(e) = serve.await {
                error!(error = %e, "WebSocket server error");
            }
        });

        Ok(Uuid::new_v4().to_string())
    }

    fn disconnect(&mut self) {
        info!(
            connections = self.active.len(),
            "shutting down WebSocket transport"
        );

        if let Some(stop) = self.stop_listener.take() {
            let _ = stop.send(());
        }

        // Every socket task subscribes to this; sending ends them all.
        let _ = self.shutdown.send(());
    }
}

/// GET /ws?name=... - WebSocket upgrade handler
async fn ws_handler<R: GameRules>(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<WsState<R>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.name, state))
}

/// Per-socket task: pumps outgoing engine messages to the wire and
/// inbound frames back into the engine.
async fn handle_socket<R: GameRules>(mut socket: WebSocket, name: String, state: WsState<R>) {
    let (sender, mut outgoing) = mpsc::unbounded_channel();
    let mut shutdown = state.shutdown.subscribe();

    let accepted = state.server.client_connected(&name, sender).await.is_ok();

    if !accepted {
        // Deliver the rejection error, then drop the socket; the client
        // was never registered.
        while let Ok(message) = outgoing.try_recv() {
            if let Ok(text) = serde_json::to_string(&message) {
                let _ = socket.send(Message::Text(text)).await;
            }
        }
        return;
    }

    state.active.insert(name.clone(), Instant::now());

    loop {
        tokio::select! {
            message = outgoing.recv() => {
                match message {
                    Some(message) => {
                        let terminal = matches!(message, ServerMessage::Error(_));

                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                error!(client = %name, error = %e, "failed to encode message");
                                continue;
                            }
                        };

                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }

                        // An error message terminates the connection
                        // after delivery.
                        if terminal {
                            break;
                        }
                    }
                    None => break,
                }
            }

            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage<R::Command>>(&text) {
                            Ok(message) => {
                                let quitting = matches!(message, ClientMessage::Quit);
                                state.server.receive(&name, message).await;
                                if quitting {
                                    break;
                                }
                            }
                            Err(_) => {
                                warn!(client = %name, "unrecognized message ignored");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ignore binary and pong frames.
                    }
                    Some(Err(e)) => {
                        warn!(client = %name, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            _ = shutdown.recv() => break,
        }
    }

    state.active.remove(&name);
    state.server.client_disconnected(&name).await;
}
