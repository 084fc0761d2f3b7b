//! The WebSocket transport server
//!
//! # Architecture
//!
//! ```text
//! Client ──ws──▶ /v1/graphql ──▶ upgrade() ──▶ run_connection()
//!                                                   │
//!                                   reader ── dispatch ── plan steps
//!                                      │                     │
//!                                   writer ◀── outbound ◀────┘
//!                                      │
//!                                   poller ──on_change──▶ outbound
//! ```
//!
//! The environment ([`WsEnvironment`]) carries every collaborator; the
//! handshake fixes per-connection tags; dispatch executes operations against
//! plan steps; the poller pushes subscription results back through the same
//! outbound queue.

pub mod connection;
pub mod dispatch;
pub mod environment;
pub mod handler;
pub mod handshake;
pub mod log;
pub mod metrics;
pub mod protocol;

pub use connection::{AuthPhase, ConnState, OperationEntry, WsConnection};
pub use environment::{WsEnvironment, WsEnvironmentBuilder};
pub use handler::{serve, ws_router};
pub use handshake::{ErrorStyle, QueryKind, SUBPROTOCOL};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use protocol::{ClientMessage, InitPayload, ServerMessage};
