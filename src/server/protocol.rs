//! WebSocket subprotocol message definitions
//!
//! Implements the `graphql-ws` (legacy Apollo) subprotocol. Messages are JSON
//! objects tagged by `type`.
//!
//! ## Client → Server Messages
//!
//! ```json
//! // Open the session
//! {"type": "connection_init", "payload": {"headers": {"authorization": "..."}}}
//!
//! // Start an operation
//! {"type": "start", "id": "q1", "payload": {"query": "{ foo }"}}
//!
//! // Stop an operation
//! {"type": "stop", "id": "q1"}
//!
//! // Close the session
//! {"type": "connection_terminate"}
//! ```
//!
//! ## Server → Client Messages
//!
//! ```json
//! {"type": "connection_ack"}
//! {"type": "connection_ka"}
//! {"type": "connection_error", "payload": "..."}
//! {"type": "data", "id": "q1", "payload": {"data": {...}}}
//! {"type": "error", "id": "q1", "payload": {...}}
//! {"type": "complete", "id": "q1"}
//! ```

use crate::core::error::ProtocolError;
use crate::core::request::GqlRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Extra payload carried by `connection_init`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitPayload {
    /// Headers to merge over the handshake headers (these win on duplicates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open the session, optionally supplying extra auth headers
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<InitPayload>,
    },
    /// Start an operation under a client-chosen id
    Start { id: String, payload: GqlRequest },
    /// Stop the operation with the given id
    Stop { id: String },
    /// Close the session
    ConnectionTerminate,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// `connection_init` succeeded
    ConnectionAck,
    /// Keepalive tick
    ConnectionKa,
    /// `connection_init` failed, or a frame failed to decode
    ConnectionError { payload: Value },
    /// Operation result (one per query/mutation, many per subscription)
    Data { id: String, payload: Value },
    /// Operation-level error
    Error { id: String, payload: Value },
    /// No further messages will be sent for this id
    Complete { id: String },
}

/// Decode one inbound text frame
///
/// A decode failure is reported to the client as a `connection_error`; it
/// does not close the socket.
pub fn decode_client_frame(text: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame {
        message: e.to_string(),
    })
}

/// Encode one outbound frame
pub fn encode_server_frame(message: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::InvalidFrame {
        message: format!("failed to encode server frame: {}", e),
    })
}
