//! Core domain types shared across the transport
//!
//! Everything the WebSocket layer needs that is not itself protocol plumbing:
//! error taxonomy, authentication, request parsing, the allow-list check, and
//! the schema cache.

pub mod allowlist;
pub mod auth;
pub mod error;
pub mod request;
pub mod schema;

pub use allowlist::{AllowlistChecker, NamedQuery, QueryCollection};
pub use auth::{AuthOutcome, Authenticator, SessionVariables, UserInfo};
pub use error::{
    AuthError, ExecutionError, GatewayError, GatewayResult, HandshakeError, PlanError,
    ProtocolError, RequestError,
};
pub use request::{GqlRequest, OperationKind, ParsedRequest, QueryKind};
pub use schema::{GatewaySchema, SchemaCache, SchemaVersion};
