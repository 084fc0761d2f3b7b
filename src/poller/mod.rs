//! Live-query poller interface
//!
//! The poller owns long-poll subscriptions against backend sources: it groups
//! registrations by parameterised query hash, polls each group, and pushes
//! result deltas through the registered on-change callback. This crate only
//! talks to it — every active subscription entry in a connection's operation
//! registry corresponds to exactly one registration here, and removal drops
//! both together.

use crate::action::{ActionId, ActionLogMap};
use crate::core::error::ExecutionError;
use crate::plan::{QueryHash, SourcePlan};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Opaque handle for one registered live query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveQueryId(pub Uuid);

impl LiveQueryId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LiveQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One push from the poller to a subscriber
#[derive(Debug, Clone)]
pub enum LiveQueryEvent {
    /// A successful poll produced a new result
    Data {
        payload: Value,
        /// Time the poller spent producing this result
        execution_time: Duration,
    },
    /// A poll failed; the subscription itself stays registered
    Error { payload: Value },
}

/// Callback the poller drives on every push
///
/// The future is awaited by the poller before the next push for the same
/// registration, which preserves per-operation frame order on the socket.
pub type OnChange = Arc<dyn Fn(LiveQueryEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Who is subscribing, for poller-side bookkeeping and logs
#[derive(Debug, Clone)]
pub struct SubscriberMetadata {
    pub ws_id: Uuid,
    pub operation_id: String,
    pub operation_name: Option<String>,
}

/// Callbacks for async-action queue registrations
#[derive(Clone)]
pub struct AsyncActionCallbacks {
    /// Invoked with the fresh log map when any watched action completes
    pub on_result: Arc<dyn Fn(ActionLogMap) -> BoxFuture<'static, ()> + Send + Sync>,
    /// Invoked when the action queue itself fails
    pub on_error: Arc<dyn Fn(ExecutionError) -> BoxFuture<'static, ()> + Send + Sync>,
}

/// The poller surface this crate depends on
#[async_trait]
pub trait LiveQueryPoller: Send + Sync {
    /// Register a source-backed live query
    #[allow(clippy::too_many_arguments)]
    async fn add_live_query(
        &self,
        subscriber: SubscriberMetadata,
        query_hash: QueryHash,
        request_id: Uuid,
        plan: SourcePlan,
        on_change: OnChange,
    ) -> Result<LiveQueryId, ExecutionError>;

    /// Remove a registration; idempotent
    async fn remove_live_query(&self, id: LiveQueryId);

    /// Watch a set of async actions under an operation key
    async fn add_async_actions(
        &self,
        subscriber: SubscriberMetadata,
        actions: Vec<ActionId>,
        callbacks: AsyncActionCallbacks,
    ) -> Result<(), ExecutionError>;
}
