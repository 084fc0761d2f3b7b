//! WebSocket upgrade handling and the per-connection task set
//!
//! Each accepted connection runs four cooperating tasks:
//!
//! 1. The **reader** (this function's own future) drains the socket and
//!    dispatches one message at a time — a handler always runs to completion
//!    before the next frame or the expiry timer can act, so handlers are
//!    never torn mid-flight.
//! 2. The **writer** drains the outbound queue to the socket; every frame the
//!    connection emits passes through it, which totally orders them.
//! 3. The **keepalive** task enqueues `connection_ka` on a fixed period,
//!    regardless of connection state.
//! 4. The **token-expiry** watch fires once the connection is initialised
//!    with an expiry instant, closing the socket when it passes.
//!
//! On any exit the close path walks the operation registry, removes every
//! live query from the poller, and decrements the connection gauge.

use crate::server::connection::{OutboundMessage, WsConnection};
use crate::server::dispatch::{
    conn_info, handle_connection_init, handle_start, handle_stop,
};
use crate::server::environment::WsEnvironment;
use crate::core::error::HandshakeError;
use crate::server::handshake::{
    ErrorStyle, QueryKind, SUBPROTOCOL, enforce_origin, retained_headers, route_path,
};
use crate::server::log::{WsEvent, log_ws_event};
use crate::server::protocol::{
    ClientMessage, decode_client_frame, encode_server_frame,
};
use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

const CLOSE_NORMAL: u16 = 1000;

/// Build the transport router
///
/// Every known endpoint runs through one handler that looks its tags up in
/// [`route_path`]; anything else hits the fallback and is rejected with 404.
pub fn ws_router(env: Arc<WsEnvironment>) -> Router {
    Router::new()
        .route("/v1alpha1/graphql", get(graphql_ws_handler))
        .route("/v1/graphql", get(graphql_ws_handler))
        .route("/v1beta1/relay", get(graphql_ws_handler))
        .fallback(unknown_path)
        .with_state(env)
}

/// Bind and serve with graceful shutdown on SIGTERM / Ctrl+C
pub async fn serve(env: Arc<WsEnvironment>, addr: &str) -> Result<()> {
    let app = ws_router(env);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gateway shutdown complete");
    Ok(())
}

async fn graphql_ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    uri: Uri,
    State(env): State<Arc<WsEnvironment>>,
) -> Response {
    match route_path(uri.path()) {
        Some((error_style, query_kind)) => {
            upgrade(ws, headers, env, error_style, query_kind)
        }
        // Unreachable for the registered routes; kept so a routing change
        // cannot silently open an untagged endpoint.
        None => HandshakeError::UnknownPath {
            path: uri.path().to_string(),
        }
        .into_response(),
    }
}

/// Reject anything outside the three graphql endpoints
async fn unknown_path(uri: Uri) -> Response {
    HandshakeError::UnknownPath {
        path: uri.path().to_string(),
    }
    .into_response()
}

/// Client address as reported by the fronting proxy, when one is present
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Vet the handshake, then hand the socket to the connection loop
fn upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    env: Arc<WsEnvironment>,
    error_style: ErrorStyle,
    query_kind: QueryKind,
) -> Response {
    if let Err(err) = enforce_origin(&env.config.cors, &headers) {
        log_ws_event(
            None,
            &crate::server::log::WsConnInfo::new(uuid::Uuid::new_v4()),
            &WsEvent::Rejected {
                reason: err.to_string(),
            },
        );
        return err.into_response();
    }

    let ip = client_ip(&headers);
    let retained = retained_headers(&env.config.cors, &headers);

    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| run_connection(env, socket, retained, ip, error_style, query_kind))
}

/// Whether the reader loop should keep going after a message
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Terminate,
}

/// Own one accepted socket from accept to close
async fn run_connection(
    env: Arc<WsEnvironment>,
    socket: WebSocket,
    retained_headers: HeaderMap,
    ip: Option<String>,
    error_style: ErrorStyle,
    query_kind: QueryKind,
) {
    let (conn, outbound_rx, expiry_rx) =
        WsConnection::new(error_style, query_kind, retained_headers, ip);

    env.metrics.connection_opened();
    log_ws_event(None, &conn_info(&conn).await, &WsEvent::Accepted);

    let (ws_write, mut ws_read) = socket.split();

    let mut writer = tokio::spawn(write_loop(ws_write, outbound_rx, conn.id));
    let keepalive = tokio::spawn(keepalive_loop(
        conn.clone(),
        Duration::from_secs(env.config.keep_alive_delay_secs),
    ));

    // Reader: one message at a time. The expiry branch can only win between
    // handlers, never interrupt one.
    let mut expiry = Box::pin(token_expiry_wait(expiry_rx));
    loop {
        tokio::select! {
            _ = &mut expiry => {
                tracing::info!(ws_id = %conn.id, "closing connection on token expiry");
                conn.close_with(CLOSE_NORMAL, "JWT expired").await;
                break;
            }
            incoming = ws_read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if on_message(&env, &conn, &text).await == Flow::Terminate {
                            conn.close_with(CLOSE_NORMAL, "user requested the connection be closed").await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary frames and pings are ignored; axum answers
                        // pings itself.
                    }
                    Some(Err(e)) => {
                        tracing::debug!(ws_id = %conn.id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    close_connection(&env, &conn).await;

    // Let the writer flush anything already queued (including a close frame),
    // then stop it; a client that cannot drain gets cut off.
    conn.close_with(CLOSE_NORMAL, "closed").await;
    if tokio::time::timeout(Duration::from_secs(5), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    keepalive.abort();
}

/// Decode and dispatch one inbound frame
async fn on_message(env: &Arc<WsEnvironment>, conn: &Arc<WsConnection>, text: &str) -> Flow {
    let message = match decode_client_frame(text) {
        Ok(message) => message,
        Err(err) => {
            // One bad frame does not cost the socket
            conn.send(crate::server::protocol::ServerMessage::ConnectionError {
                payload: json!(err.to_string()),
            })
            .await;
            return Flow::Continue;
        }
    };

    match message {
        ClientMessage::ConnectionInit { payload } => {
            handle_connection_init(env, conn, payload).await;
            Flow::Continue
        }
        ClientMessage::Start { id, payload } => {
            handle_start(env, conn, id, payload).await;
            Flow::Continue
        }
        ClientMessage::Stop { id } => {
            handle_stop(env, conn, &id).await;
            Flow::Continue
        }
        ClientMessage::ConnectionTerminate => Flow::Terminate,
    }
}

/// Drain the outbound queue onto the socket
///
/// The single consumer of the queue; every frame for the connection passes
/// through here, which gives the total per-connection ordering.
async fn write_loop(
    mut ws_write: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    ws_id: uuid::Uuid,
) {
    while let Some(item) = outbound_rx.recv().await {
        match item {
            OutboundMessage::Frame(frame) => match encode_server_frame(&frame) {
                Ok(encoded) => {
                    if ws_write.send(Message::Text(encoded.into())).await.is_err() {
                        tracing::debug!(ws_id = %ws_id, "websocket write failed, stopping writer");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(ws_id = %ws_id, error = %e, "failed to encode server frame");
                }
            },
            OutboundMessage::Close { code, reason } => {
                let _ = ws_write
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Enqueue `connection_ka` every period, independent of connection state
async fn keepalive_loop(conn: Arc<WsConnection>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // Consume the immediate first tick; the init path sends the first ka.
    interval.tick().await;
    loop {
        interval.tick().await;
        conn.send(crate::server::protocol::ServerMessage::ConnectionKa)
            .await;
    }
}

/// Resolve once the connection's token expiry passes
///
/// Blocks until `connection_init` publishes a non-null expiry, then sleeps
/// until that instant. A connection without an expiry keeps this pending for
/// its whole lifetime.
async fn token_expiry_wait(mut expiry_rx: watch::Receiver<Option<DateTime<Utc>>>) {
    loop {
        let deadline = *expiry_rx.borrow();
        match deadline {
            Some(instant) => {
                let now = Utc::now();
                if instant <= now {
                    return;
                }
                let wait = (instant - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                return;
            }
            None => {
                if expiry_rx.changed().await.is_err() {
                    // Sender gone; the reader's other branches decide the
                    // connection's fate.
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

/// Release everything a connection owns
///
/// The `closed` event goes out first so the log still shows the live-query
/// count; then every registered live query is removed from the poller, and
/// only then does the gauge drop.
async fn close_connection(env: &Arc<WsEnvironment>, conn: &Arc<WsConnection>) {
    let live_count = conn.operation_count().await;
    let user_vars = conn.session_vars().await;
    let info = conn_info(conn)
        .await
        .with_msg(format!("{} live queries at close", live_count));
    log_ws_event(user_vars.as_ref(), &info, &WsEvent::Closed);

    for (operation_id, entry) in conn.drain_operations().await {
        tracing::debug!(
            ws_id = %conn.id,
            operation_id = %operation_id,
            live_query_id = %entry.live_query_id,
            "removing live query on close"
        );
        env.poller.remove_live_query(entry.live_query_id).await;
    }

    env.metrics.connection_closed();
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
