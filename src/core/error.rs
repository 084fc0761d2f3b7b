//! Typed error handling for the gateway transport
//!
//! This module provides the error type hierarchy used across the WebSocket
//! transport. Each category gets its own enum so callers can handle errors
//! specifically rather than matching on strings.
//!
//! # Error Categories
//!
//! - [`HandshakeError`]: HTTP-upgrade stage failures (unknown path, origin denied)
//! - [`AuthError`]: authenticator rejections during `connection_init`
//! - [`RequestError`]: request parsing and allow-list failures
//! - [`PlanError`]: execution-planner failures
//! - [`ExecutionError`]: plan-step failures (backend, remote schema, action, poller)
//! - [`ProtocolError`]: subprotocol violations (bad frame, duplicate operation id)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// The top-level error type for the gateway transport
#[derive(Debug)]
pub enum GatewayError {
    /// HTTP-upgrade stage failures
    Handshake(HandshakeError),

    /// Authenticator rejections
    Auth(AuthError),

    /// Request parsing / allow-list failures
    Request(RequestError),

    /// Planner failures
    Plan(PlanError),

    /// Plan-step execution failures
    Execution(ExecutionError),

    /// Subprotocol violations
    Protocol(ProtocolError),

    /// Internal invariant violations (should not happen in normal operation)
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Handshake(e) => write!(f, "{}", e),
            GatewayError::Auth(e) => write!(f, "{}", e),
            GatewayError::Request(e) => write!(f, "{}", e),
            GatewayError::Plan(e) => write!(f, "{}", e),
            GatewayError::Execution(e) => write!(f, "{}", e),
            GatewayError::Protocol(e) => write!(f, "{}", e),
            GatewayError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Handshake(e) => Some(e),
            GatewayError::Auth(e) => Some(e),
            GatewayError::Request(e) => Some(e),
            GatewayError::Plan(e) => Some(e),
            GatewayError::Execution(e) => Some(e),
            GatewayError::Protocol(e) => Some(e),
            GatewayError::Internal(_) => None,
        }
    }
}

impl GatewayError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Handshake(e) => e.error_code(),
            GatewayError::Auth(_) => "AUTH_FAILED",
            GatewayError::Request(e) => e.error_code(),
            GatewayError::Plan(_) => "PLAN_FAILED",
            GatewayError::Execution(e) => e.error_code(),
            GatewayError::Protocol(e) => e.error_code(),
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

// =============================================================================
// Handshake Errors
// =============================================================================

/// Errors raised while upgrading an HTTP request to a WebSocket
#[derive(Debug)]
pub enum HandshakeError {
    /// The request path does not name a GraphQL endpoint
    UnknownPath { path: String },

    /// The `Origin` header is not covered by the configured CORS policy
    AccessDenied { origin: String },

    /// The `Origin` header is missing while the policy requires one
    MissingOrigin,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::UnknownPath { path } => {
                write!(f, "no such path: {}", path)
            }
            HandshakeError::AccessDenied { origin } => {
                write!(f, "origin not allowed: {}", origin)
            }
            HandshakeError::MissingOrigin => {
                write!(f, "origin header required but not present")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

impl HandshakeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandshakeError::UnknownPath { .. } => StatusCode::NOT_FOUND,
            HandshakeError::AccessDenied { .. } => StatusCode::BAD_REQUEST,
            HandshakeError::MissingOrigin => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            HandshakeError::UnknownPath { .. } => "NOT_FOUND",
            HandshakeError::AccessDenied { .. } => "ACCESS_DENIED",
            HandshakeError::MissingOrigin => "ACCESS_DENIED",
        }
    }
}

/// Machine-readable reject body sent on handshake failure
#[derive(Debug, Serialize)]
pub struct HandshakeReject {
    pub code: String,
    pub error: String,
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(HandshakeReject {
            code: self.error_code().to_string(),
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<HandshakeError> for GatewayError {
    fn from(err: HandshakeError) -> Self {
        GatewayError::Handshake(err)
    }
}

// =============================================================================
// Auth Errors
// =============================================================================

/// Rejection raised by the authenticator during `connection_init`
///
/// The message is what a subsequent `start` echoes back in its
/// "cannot start as connection_init failed with: ..." error.
#[derive(Debug)]
pub struct AuthError {
    pub message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        GatewayError::Auth(err)
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors raised while parsing and vetting an operation request
#[derive(Debug)]
pub enum RequestError {
    /// The query text failed to parse
    ParseFailed { message: String },

    /// The document contains no executable operation
    NoOperation,

    /// `operationName` does not match any operation in the document
    OperationNotFound { name: String },

    /// The document has several operations but no `operationName` was given
    AmbiguousOperation,

    /// The query is not part of any allow-listed collection
    NotAllowed,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::ParseFailed { message } => {
                write!(f, "failed to parse query: {}", message)
            }
            RequestError::NoOperation => {
                write!(f, "no executable operation found in the document")
            }
            RequestError::OperationNotFound { name } => {
                write!(f, "operation '{}' not found in the document", name)
            }
            RequestError::AmbiguousOperation => {
                write!(
                    f,
                    "exactly one operation is required when operationName is not given"
                )
            }
            RequestError::NotAllowed => {
                write!(f, "query is not in any of the allowed collections")
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl RequestError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::ParseFailed { .. } => "PARSE_FAILED",
            RequestError::NoOperation => "VALIDATION_FAILED",
            RequestError::OperationNotFound { .. } => "VALIDATION_FAILED",
            RequestError::AmbiguousOperation => "VALIDATION_FAILED",
            RequestError::NotAllowed => "QUERY_NOT_ALLOWED",
        }
    }
}

impl From<RequestError> for GatewayError {
    fn from(err: RequestError) -> Self {
        GatewayError::Request(err)
    }
}

// =============================================================================
// Plan Errors
// =============================================================================

/// Errors raised by the execution planner
#[derive(Debug)]
pub enum PlanError {
    /// The request does not type-check against the current schema
    ValidationFailed { message: String },

    /// A field in the request has no known resolution
    UnknownField { field: String },

    /// The planner itself failed
    Internal { message: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::ValidationFailed { message } => {
                write!(f, "validation failed: {}", message)
            }
            PlanError::UnknownField { field } => {
                write!(f, "field '{}' not found in schema", field)
            }
            PlanError::Internal { message } => {
                write!(f, "planner error: {}", message)
            }
        }
    }
}

impl std::error::Error for PlanError {}

impl From<PlanError> for GatewayError {
    fn from(err: PlanError) -> Self {
        GatewayError::Plan(err)
    }
}

// =============================================================================
// Execution Errors
// =============================================================================

/// Errors raised while executing plan steps
#[derive(Debug)]
pub enum ExecutionError {
    /// A database step failed
    Backend { source: String, message: String },

    /// No transport is registered for a backend tag
    UnknownBackend { tag: String },

    /// A remote-schema step failed
    Remote { endpoint: String, message: String },

    /// The remote schema returned GraphQL errors
    RemoteErrors {
        endpoint: String,
        errors: serde_json::Value,
    },

    /// An action step failed
    Action { action: String, message: String },

    /// The live-query poller rejected a registration
    Poller { message: String },

    /// An expected async-action log entry was missing
    MissingActionLog { action_id: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Backend { source, message } => {
                write!(f, "database error on source '{}': {}", source, message)
            }
            ExecutionError::UnknownBackend { tag } => {
                write!(f, "no transport registered for backend '{}'", tag)
            }
            ExecutionError::Remote { endpoint, message } => {
                write!(f, "remote schema '{}' error: {}", endpoint, message)
            }
            ExecutionError::RemoteErrors { endpoint, .. } => {
                write!(f, "remote schema '{}' returned errors", endpoint)
            }
            ExecutionError::Action { action, message } => {
                write!(f, "action '{}' failed: {}", action, message)
            }
            ExecutionError::Poller { message } => {
                write!(f, "live-query registration failed: {}", message)
            }
            ExecutionError::MissingActionLog { action_id } => {
                write!(f, "no log entry for async action {}", action_id)
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

impl ExecutionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ExecutionError::Backend { .. } => "DATA_EXCEPTION",
            ExecutionError::UnknownBackend { .. } => "INTERNAL_ERROR",
            ExecutionError::Remote { .. } => "REMOTE_SCHEMA_ERROR",
            ExecutionError::RemoteErrors { .. } => "REMOTE_SCHEMA_ERROR",
            ExecutionError::Action { .. } => "ACTION_ERROR",
            ExecutionError::Poller { .. } => "SUBSCRIPTION_ERROR",
            ExecutionError::MissingActionLog { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<ExecutionError> for GatewayError {
    fn from(err: ExecutionError) -> Self {
        GatewayError::Execution(err)
    }
}

// =============================================================================
// Protocol Errors
// =============================================================================

/// Subprotocol violations on an established socket
#[derive(Debug)]
pub enum ProtocolError {
    /// An inbound frame failed to decode
    InvalidFrame { message: String },

    /// A `start` reused an id that is still live
    DuplicateOperation { operation_id: String },

    /// A `start` arrived before `connection_init` succeeded
    NotInitialised,

    /// A `start` arrived after `connection_init` failed
    InitFailed { message: String },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidFrame { message } => {
                write!(f, "invalid message: {}", message)
            }
            ProtocolError::DuplicateOperation { operation_id } => {
                write!(
                    f,
                    "an operation already exists with this id: {}",
                    operation_id
                )
            }
            ProtocolError::NotInitialised => {
                write!(f, "start received before the connection is initialised")
            }
            ProtocolError::InitFailed { message } => {
                write!(f, "cannot start as connection_init failed with: {}", message)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ProtocolError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidFrame { .. } => "INVALID_FRAME",
            ProtocolError::DuplicateOperation { .. } => "DUPLICATE_OPERATION",
            ProtocolError::NotInitialised => "START_FAILED",
            ProtocolError::InitFailed { .. } => "START_FAILED",
        }
    }
}

impl From<ProtocolError> for GatewayError {
    fn from(err: ProtocolError) -> Self {
        GatewayError::Protocol(err)
    }
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Protocol(ProtocolError::InvalidFrame {
            message: err.to_string(),
        })
    }
}

/// A specialized Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
