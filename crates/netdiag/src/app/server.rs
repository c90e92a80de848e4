//! HTTP + WebSocket server. Each upgraded socket runs one [`ConnectionSession`].

use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::infra::ServerConfig;
use crate::infra::TokioProcessLauncher;
use crate::usecases::CommandDispatcher;
use crate::usecases::ConnectionSession;
use crate::usecases::Outbound;
use crate::usecases::ports::ProcessLauncherHandle;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address: {message}")]
    InvalidListen { message: String },
    #[error("Server I/O error ({operation}): {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    pub fn suggestion(&self) -> &'static str {
        match self {
            ServerError::InvalidListen { .. } => {
                "Use HOST:PORT, e.g. 127.0.0.1:3000. Pass --allow-remote to bind a public address."
            }
            ServerError::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::AddrInUse => "Another process is using this port.",
                std::io::ErrorKind::PermissionDenied => {
                    "Permission denied. Ports below 1024 usually need elevated privileges."
                }
                _ => "Check server logs for details.",
            },
        }
    }
}

/// A running server. Dropping it does not stop the server; flip the
/// shutdown channel passed to [`start_server`] instead.
pub struct ServerHandle {
    local_addr: SocketAddr,
    join: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ws_url(&self) -> String {
        format_ws_url(&self.local_addr)
    }

    /// Waits until the server has shut down.
    pub async fn wait(self) -> Result<(), ServerError> {
        self.join.await.map_err(|err| ServerError::Io {
            operation: "join server task",
            source: std::io::Error::other(err.to_string()),
        })
    }
}

struct ServerState {
    dispatcher: Arc<CommandDispatcher>,
    limits: Arc<Semaphore>,
    event_queue: usize,
    send_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

/// Binds `config.listen()` and serves until `shutdown_rx` flips to `true`
/// (or its sender is dropped).
pub async fn start_server(
    config: ServerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<ServerHandle, ServerError> {
    let launcher: ProcessLauncherHandle = Arc::new(TokioProcessLauncher);
    start_server_with_launcher(config, launcher, shutdown_rx).await
}

pub async fn start_server_with_launcher(
    config: ServerConfig,
    launcher: ProcessLauncherHandle,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<ServerHandle, ServerError> {
    let (listener, local_addr) = bind_listener(&config)?;
    let listener = TcpListener::from_std(listener).map_err(|e| ServerError::Io {
        operation: "create async listener",
        source: e,
    })?;

    let dispatcher = CommandDispatcher::new(launcher, config.tools().clone());
    debug!(tools = ?dispatcher.tools(), "Diagnostic tools");
    let state = Arc::new(ServerState {
        dispatcher: Arc::new(dispatcher),
        limits: Arc::new(Semaphore::new(config.max_connections())),
        event_queue: config.event_queue(),
        send_timeout: config.send_timeout(),
        shutdown_rx: shutdown_rx.clone(),
    });

    let app = build_router(state);
    info!(ws = %format_ws_url(&local_addr), "Server listening");

    let join = tokio::spawn(async move {
        let mut shutdown_server = shutdown_rx.clone();
        let mut shutdown_wait = shutdown_rx;
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            wait_for_shutdown(&mut shutdown_server).await;
        });
        let mut server_task = tokio::spawn(async move { server.await });

        tokio::select! {
            join_result = &mut server_task => {
                log_server_exit(join_result);
            }
            _ = wait_for_shutdown(&mut shutdown_wait) => {
                match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server_task).await {
                    Ok(join_result) => log_server_exit(join_result),
                    Err(_) => {
                        warn!(
                            timeout_ms = SHUTDOWN_TIMEOUT.as_millis(),
                            "Server shutdown timed out; aborting"
                        );
                        server_task.abort();
                    }
                }
            }
        }
        info!("Server stopped");
    });

    Ok(ServerHandle { local_addr, join })
}

fn log_server_exit(join_result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match join_result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "Server failed"),
        Err(err) => error!(error = %err, "Server task failed"),
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        debug!("Shutdown channel closed");
    }
}

fn build_router(state: Arc<ServerState>) -> axum::Router {
    axum::Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/api", get(api_status))
        .route("/api/realtime-command", post(realtime_command))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn api_status() -> Json<serde_json::Value> {
    Json(json!({ "message": "Network diagnostics API is running" }))
}

async fn realtime_command() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": "Use WebSocket connection for real-time command output",
    }))
}

async fn ws_handler(State(state): State<Arc<ServerState>>, ws: WebSocketUpgrade) -> Response {
    let permit = match state.limits.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Rejecting WebSocket upgrade: connection limit reached");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "too many websocket connections" })),
            )
                .into_response();
        }
    };

    let ctx = WsContext {
        state,
        _permit: permit,
    };

    ws.on_upgrade(move |socket| {
        let connection_id = Uuid::new_v4();
        handle_ws(socket, ctx).instrument(tracing::info_span!(
            "connection",
            connection_id = %connection_id
        ))
    })
    .into_response()
}

struct WsContext {
    state: Arc<ServerState>,
    _permit: OwnedSemaphorePermit,
}

async fn handle_ws(mut socket: WebSocket, ctx: WsContext) {
    let WsContext {
        state,
        _permit: _permit_guard,
    } = ctx;

    let (events_tx, mut events_rx) = mpsc::channel(state.event_queue);
    let mut session = ConnectionSession::new(Arc::clone(&state.dispatcher), events_tx);
    let mut shutdown_rx = state.shutdown_rx.clone();
    let send_timeout = state.send_timeout;
    info!("Client connected");

    let greeting = Outbound::Frame(session.greeting());
    if send_outbound(&mut socket, greeting, send_timeout).await.is_ok() {
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                msg = socket.recv() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(err)) => {
                            debug!(error = %err, "WebSocket receive failed");
                            break;
                        }
                        None => break,
                    };

                    let outbound = match msg {
                        Message::Text(text) => session.handle_text(&text, &mut events_rx),
                        Message::Binary(payload) => session.handle_binary(payload),
                        Message::Ping(payload) => {
                            if socket.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        Message::Pong(_) => continue,
                        Message::Close(_) => break,
                    };
                    if send_all(&mut socket, outbound, send_timeout).await.is_err() {
                        break;
                    }
                }
                Some(event) = events_rx.recv() => {
                    if let Some(frame) = session.handle_event(event) {
                        if send_outbound(&mut socket, Outbound::Frame(frame), send_timeout)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        }
    }

    let swept = session.close();
    info!(swept, "Client disconnected");
}

fn to_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Frame(frame) => Message::Text(frame.to_json()),
        Outbound::Text(text) => Message::Text(text),
        Outbound::Binary(payload) => Message::Binary(payload),
    }
}

async fn send_all(
    socket: &mut WebSocket,
    outbound: Vec<Outbound>,
    send_timeout: Duration,
) -> Result<(), ()> {
    for item in outbound {
        send_outbound(socket, item, send_timeout).await?;
    }
    Ok(())
}

async fn send_outbound(
    socket: &mut WebSocket,
    outbound: Outbound,
    send_timeout: Duration,
) -> Result<(), ()> {
    let send = tokio::time::timeout(send_timeout, socket.send(to_message(outbound))).await;
    match send {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            debug!(error = %err, "WebSocket send failed");
            Err(())
        }
        Err(_) => {
            warn!(
                timeout_ms = send_timeout.as_millis(),
                "WebSocket send timed out; dropping client"
            );
            Err(())
        }
    }
}

fn bind_listener(config: &ServerConfig) -> Result<(std::net::TcpListener, SocketAddr), ServerError> {
    let mut addrs = config
        .listen()
        .to_socket_addrs()
        .map_err(|e| ServerError::InvalidListen {
            message: format!("{}: {e}", config.listen()),
        })?;
    let addr = addrs.next().ok_or_else(|| ServerError::InvalidListen {
        message: format!("{}: no resolved address", config.listen()),
    })?;

    if !config.allow_remote() && !addr.ip().is_loopback() {
        return Err(ServerError::InvalidListen {
            message: format!(
                "refusing to bind non-loopback address {addr} without NETDIAG_ALLOW_REMOTE=1 or --allow-remote"
            ),
        });
    }

    let listener = std::net::TcpListener::bind(addr).map_err(|e| ServerError::Io {
        operation: "bind",
        source: e,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Io {
            operation: "set non-blocking",
            source: e,
        })?;
    let local_addr = listener.local_addr().map_err(|e| ServerError::Io {
        operation: "read local address",
        source: e,
    })?;
    Ok((listener, local_addr))
}

fn format_ws_url(addr: &SocketAddr) -> String {
    let host = match addr.ip() {
        std::net::IpAddr::V4(ip) => ip.to_string(),
        std::net::IpAddr::V6(ip) => format!("[{ip}]"),
    };
    format!("ws://{}:{}/ws", host, addr.port())
}
