//! Structured log events for the WebSocket transport
//!
//! Every lifecycle transition of a connection or operation emits exactly one
//! record here. Records serialize to JSON and go out through `tracing`, so a
//! collector sees `{user_vars?, connection: {ws_id, ...}, event}` documents.

use crate::core::auth::SessionVariables;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Connection identity attached to every record
#[derive(Debug, Clone, Serialize)]
pub struct WsConnInfo {
    pub ws_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl WsConnInfo {
    pub fn new(ws_id: Uuid) -> Self {
        Self {
            ws_id,
            token_expiry: None,
            msg: None,
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }
}

/// What happened to an operation
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationLogKind {
    Started,
    ProtoErr,
    QueryErr,
    Completed,
    Stopped,
}

/// Operation-level detail payload
#[derive(Debug, Clone, Serialize)]
pub struct OperationDetails {
    pub kind: OperationLogKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameterized_query_hash: Option<String>,
    /// Backing kind for subscription starts; only recorded when the
    /// subscription has no async-action component
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl OperationDetails {
    pub fn new(kind: OperationLogKind, operation_id: impl Into<String>) -> Self {
        Self {
            kind,
            operation_id: Some(operation_id.into()),
            operation_name: None,
            request_id: None,
            parameterized_query_hash: None,
            query_kind: None,
            error: None,
        }
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }
}

/// One lifecycle event on a connection
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", content = "detail")]
pub enum WsEvent {
    Accepted,
    Rejected { reason: String },
    ConnectionError { message: String },
    Operation(OperationDetails),
    Closed,
}

/// Full log record
#[derive(Debug, Clone, Serialize)]
pub struct WsLogRecord<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_vars: Option<&'a SessionVariables>,
    pub connection: &'a WsConnInfo,
    pub event: &'a WsEvent,
}

/// Emit one record through `tracing`
///
/// Errors and protocol violations log at error/warn; routine lifecycle at
/// info; `stopped`-for-unknown-id style noise stays at debug in the caller.
pub fn log_ws_event(user_vars: Option<&SessionVariables>, conn: &WsConnInfo, event: &WsEvent) {
    let record = WsLogRecord {
        user_vars,
        connection: conn,
        event,
    };
    let payload = match serde_json::to_value(&record) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(ws_id = %conn.ws_id, error = %e, "failed to serialize log record");
            return;
        }
    };

    match event {
        WsEvent::ConnectionError { .. } => {
            tracing::warn!(ws_id = %conn.ws_id, record = %payload, "websocket event")
        }
        WsEvent::Operation(details)
            if matches!(
                details.kind,
                OperationLogKind::ProtoErr | OperationLogKind::QueryErr
            ) =>
        {
            tracing::warn!(ws_id = %conn.ws_id, record = %payload, "websocket event")
        }
        _ => tracing::info!(ws_id = %conn.ws_id, record = %payload, "websocket event"),
    }
}
