//! Per-socket connection descriptor
//!
//! A [`WsConnection`] owns everything one accepted socket needs: the
//! connection-state variable, the operation registry, and the sending half of
//! the outbound queue. The descriptor is shared between the reader task, the
//! keepalive and token-expiry tasks, and the on-change callbacks handed to
//! the live-query poller.
//!
//! State is monotonic: `NotInitialised` moves to exactly one of `InitError`
//! or `Initialised` during `connection_init` and never changes again.

use crate::core::UserInfo;
use crate::poller::LiveQueryId;
use crate::server::handshake::{ErrorStyle, QueryKind};
use crate::server::protocol::ServerMessage;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use uuid::Uuid;

/// Frames queued per connection before producers block
///
/// A stalled client eventually blocks its producers (including keepalive),
/// which is acceptable: such a client is already dead and will be reaped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 16;

/// Lifecycle state of one connection
#[derive(Debug, Clone)]
pub enum ConnState {
    /// Accepted, `connection_init` not yet processed
    NotInitialised {
        headers: HeaderMap,
        ip: Option<String>,
    },
    /// `connection_init` failed; every subsequent `start` is refused
    InitError { message: String },
    /// `connection_init` succeeded
    Initialised {
        user: UserInfo,
        token_expiry: Option<DateTime<Utc>>,
        headers: HeaderMap,
        ip: Option<String>,
    },
}

/// Cloned summary of the state, as the dispatch path consumes it
#[derive(Debug, Clone)]
pub enum AuthPhase {
    NotInitialised,
    Failed {
        message: String,
    },
    Ready {
        user: UserInfo,
        headers: HeaderMap,
    },
}

/// One active subscription on a connection
#[derive(Debug, Clone)]
pub struct OperationEntry {
    pub live_query_id: LiveQueryId,
    pub operation_name: Option<String>,
}

/// What travels through the outbound queue to the writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A subprotocol frame to serialize onto the socket
    Frame(ServerMessage),
    /// Close the socket with a documented reason; the writer ends after this
    Close { code: u16, reason: &'static str },
}

/// Descriptor for one accepted WebSocket
pub struct WsConnection {
    pub id: Uuid,
    pub error_style: ErrorStyle,
    pub query_kind: QueryKind,
    state: RwLock<ConnState>,
    operations: Mutex<HashMap<String, OperationEntry>>,
    outbound: mpsc::Sender<OutboundMessage>,
    expiry_tx: watch::Sender<Option<DateTime<Utc>>>,
}

impl WsConnection {
    /// Create the descriptor plus the receiving ends of its channels
    ///
    /// The caller owns the outbound receiver (drained by the writer task) and
    /// the expiry watch (observed by the token-expiry task).
    pub fn new(
        error_style: ErrorStyle,
        query_kind: QueryKind,
        headers: HeaderMap,
        ip: Option<String>,
    ) -> (
        std::sync::Arc<Self>,
        mpsc::Receiver<OutboundMessage>,
        watch::Receiver<Option<DateTime<Utc>>>,
    ) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (expiry_tx, expiry_rx) = watch::channel(None);

        let conn = std::sync::Arc::new(Self {
            id: Uuid::new_v4(),
            error_style,
            query_kind,
            state: RwLock::new(ConnState::NotInitialised { headers, ip }),
            operations: Mutex::new(HashMap::new()),
            outbound,
            expiry_tx,
        });
        (conn, outbound_rx, expiry_rx)
    }

    // ── Outbound queue ───────────────────────────────────────────────────

    /// Enqueue a frame for the writer
    ///
    /// After close the receiver is gone and the frame is dropped silently;
    /// late pushes from in-flight plan steps or the poller land here.
    pub async fn send(&self, message: ServerMessage) {
        if self
            .outbound
            .send(OutboundMessage::Frame(message))
            .await
            .is_err()
        {
            tracing::debug!(ws_id = %self.id, "connection closed, dropping frame");
        }
    }

    /// Ask the writer to close the socket with a documented reason
    ///
    /// Queued frames ahead of this item are still flushed first.
    pub async fn close_with(&self, code: u16, reason: &'static str) {
        if self
            .outbound
            .send(OutboundMessage::Close { code, reason })
            .await
            .is_err()
        {
            tracing::debug!(ws_id = %self.id, "connection already closed");
        }
    }

    // ── Connection state ─────────────────────────────────────────────────

    /// Snapshot the state as the dispatch path sees it
    pub async fn auth_phase(&self) -> AuthPhase {
        match &*self.state.read().await {
            ConnState::NotInitialised { .. } => AuthPhase::NotInitialised,
            ConnState::InitError { message } => AuthPhase::Failed {
                message: message.clone(),
            },
            ConnState::Initialised { user, headers, .. } => AuthPhase::Ready {
                user: user.clone(),
                headers: headers.clone(),
            },
        }
    }

    /// Handshake headers, available until `connection_init` resolves them
    pub async fn handshake_headers(&self) -> Option<HeaderMap> {
        match &*self.state.read().await {
            ConnState::NotInitialised { headers, .. } => Some(headers.clone()),
            _ => None,
        }
    }

    /// Transition `NotInitialised → InitError`
    ///
    /// Returns false (and changes nothing) from any other state, which makes
    /// a repeated `connection_init` a silent no-op.
    pub async fn mark_init_error(&self, message: String) -> bool {
        let mut state = self.state.write().await;
        match &*state {
            ConnState::NotInitialised { .. } => {
                *state = ConnState::InitError { message };
                true
            }
            _ => false,
        }
    }

    /// Transition `NotInitialised → Initialised` and publish the token expiry
    pub async fn mark_initialised(
        &self,
        user: UserInfo,
        token_expiry: Option<DateTime<Utc>>,
        headers: HeaderMap,
    ) -> bool {
        let mut state = self.state.write().await;
        match &*state {
            ConnState::NotInitialised { ip, .. } => {
                let ip = ip.clone();
                *state = ConnState::Initialised {
                    user,
                    token_expiry,
                    headers,
                    ip,
                };
                // The expiry task only ever acts on Some
                let _ = self.expiry_tx.send(token_expiry);
                true
            }
            _ => false,
        }
    }

    /// Session variables for log records, once initialised
    pub async fn session_vars(&self) -> Option<crate::core::auth::SessionVariables> {
        match &*self.state.read().await {
            ConnState::Initialised { user, .. } => Some(user.session.clone()),
            _ => None,
        }
    }

    /// Token expiry recorded at init, if any
    pub async fn token_expiry(&self) -> Option<DateTime<Utc>> {
        match &*self.state.read().await {
            ConnState::Initialised { token_expiry, .. } => *token_expiry,
            _ => None,
        }
    }

    // ── Operation registry ───────────────────────────────────────────────

    /// Whether an operation with this id is live
    pub async fn contains_operation(&self, operation_id: &str) -> bool {
        self.operations.lock().await.contains_key(operation_id)
    }

    /// Insert an entry unless the id is already taken
    ///
    /// Never clobbers: a duplicate id leaves the existing subscription
    /// untouched and returns false.
    pub async fn insert_operation(&self, operation_id: &str, entry: OperationEntry) -> bool {
        let mut ops = self.operations.lock().await;
        if ops.contains_key(operation_id) {
            return false;
        }
        ops.insert(operation_id.to_string(), entry);
        true
    }

    /// Remove and return the entry for an id
    pub async fn remove_operation(&self, operation_id: &str) -> Option<OperationEntry> {
        self.operations.lock().await.remove(operation_id)
    }

    /// Swap the live-query handle under an id, returning the previous one
    ///
    /// Used when a mixed subscription is rebuilt after async-action results.
    /// `None` means the operation was stopped in the meantime and the caller
    /// must unwind its new registration.
    pub async fn replace_live_query(
        &self,
        operation_id: &str,
        new_id: LiveQueryId,
    ) -> Option<LiveQueryId> {
        let mut ops = self.operations.lock().await;
        match ops.get_mut(operation_id) {
            Some(entry) => {
                let old = entry.live_query_id;
                entry.live_query_id = new_id;
                Some(old)
            }
            None => None,
        }
    }

    /// Take every entry, leaving the registry empty; used on close
    pub async fn drain_operations(&self) -> Vec<(String, OperationEntry)> {
        self.operations.lock().await.drain().collect()
    }

    pub async fn operation_count(&self) -> usize {
        self.operations.lock().await.len()
    }
}
