//! # gqlgate
//!
//! GraphQL-over-WebSocket transport core for a data API gateway.
//!
//! ## Features
//!
//! - **`graphql-ws` subprotocol**: the legacy Apollo message set
//!   (`connection_init`/`start`/`stop`/`connection_terminate`) with strict
//!   per-connection frame ordering through a single writer
//! - **Stateful connections**: a monotonic per-socket state machine
//!   (`NotInitialised → InitError | Initialised`) with an operation registry
//!   for live subscriptions
//! - **Failure isolation**: a broken operation answers with `error` frames;
//!   only `connection_terminate` (or token expiry) closes the socket
//! - **Plan-step dispatch**: queries and mutations fan out over database,
//!   remote-schema, action, and raw steps, assembled in plan order
//! - **Live-query bridge**: subscriptions register with an external poller
//!   and are removed one-for-one on `stop` and on close
//! - **Handshake policy**: path-selected error style and query dialect,
//!   origin allow-listing with wildcards, hop-by-hop header stripping
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gqlgate::prelude::*;
//!
//! let env = WsEnvironment::builder()
//!     .with_config(GatewayConfig::from_yaml_file("gateway.yaml")?)
//!     .with_authenticator(Arc::new(AdminSecretAuthenticator::new(secret)))
//!     .with_planner(planner)
//!     .with_actions(actions)
//!     .with_poller(poller)
//!     .build()?;
//!
//! gqlgate::server::serve(env, "127.0.0.1:8080").await?;
//! ```

pub mod action;
pub mod backend;
pub mod config;
pub mod core;
pub mod plan;
pub mod poller;
pub mod remote;
pub mod server;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        allowlist::{AllowlistChecker, NamedQuery, QueryCollection},
        auth::{AdminSecretAuthenticator, AuthOutcome, Authenticator, SessionVariables, UserInfo},
        error::{GatewayError, GatewayResult},
        request::{GqlRequest, OperationKind, ParsedRequest},
        schema::{GatewaySchema, SchemaCache, SchemaVersion},
    };

    // === Plans ===
    pub use crate::plan::{
        ExecutionPlan, MutationPlan, PlanStep, Planner, QueryHash, QueryPlan, SubscriptionPlan,
    };
    pub use crate::plan::cache::ResultCache;

    // === Backends & steps ===
    pub use crate::backend::{BackendRegistry, BackendTag, BackendTransport, StepContext, StepResponse};

    // === Poller ===
    pub use crate::poller::{LiveQueryEvent, LiveQueryId, LiveQueryPoller, SubscriberMetadata};

    // === Server ===
    pub use crate::config::{CorsPolicy, GatewayConfig};
    pub use crate::server::{ErrorStyle, QueryKind, WsEnvironment, ws_router};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use uuid::Uuid;
}
