//! Action execution interfaces
//!
//! Actions are operator-defined resolvers backed by external webhooks. The
//! transport invokes synchronous actions as plan steps and, for async
//! actions, fetches log entries by id — the log is written by the action
//! runner outside this crate. Subscriptions over async actions go through the
//! poller's async-action queue (see [`crate::poller`]).

use crate::backend::{StepContext, StepResponse};
use crate::core::error::ExecutionError;
use crate::plan::ActionStep;
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of one async-action invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub Uuid);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Latest log entry per async action
pub type ActionLogMap = HashMap<ActionId, Value>;

/// Runs action steps and reads the async-action log
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Invoke a synchronous action webhook
    async fn run(
        &self,
        step: &ActionStep,
        ctx: &StepContext,
        headers: &HeaderMap,
    ) -> Result<StepResponse, ExecutionError>;

    /// Fetch the current log entries for the given async actions
    ///
    /// Every requested id must be present in the result; a missing entry is
    /// an internal error surfaced as [`ExecutionError::MissingActionLog`].
    async fn fetch_action_logs(&self, ids: &[ActionId]) -> Result<ActionLogMap, ExecutionError>;
}
