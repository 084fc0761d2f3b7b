//! Execution plans and the planner seam
//!
//! The planner turns a parsed request into an [`ExecutionPlan`]: an ordered
//! mapping from top-level response field to a [`PlanStep`], plus a stable
//! [`QueryHash`] the poller uses to multiplex identical subscriptions across
//! clients. The transport walks the plan; it never interprets step payloads
//! beyond routing them to the right executor.

pub mod cache;

use crate::action::{ActionId, ActionLogMap};
use crate::backend::BackendTag;
use crate::core::error::PlanError;
use crate::core::{GatewaySchema, GqlRequest, ParsedRequest, UserInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Stable digest of a parameterised plan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryHash(pub String);

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Post-processing spec stitching remote data into a step's response
///
/// Opaque to the transport; interpreted by the remote-join processor.
#[derive(Debug, Clone)]
pub struct RemoteJoins {
    pub spec: Value,
}

/// A database step: one generated statement against one source
#[derive(Debug, Clone)]
pub struct DbStep {
    pub backend: BackendTag,
    pub source: String,
    pub generated_sql: String,
    pub remote_joins: Option<RemoteJoins>,
}

/// A remote-schema step: forward part of the request to another GraphQL server
#[derive(Debug, Clone)]
pub struct RemoteStep {
    /// Remote GraphQL endpoint URL
    pub endpoint: String,
    /// The sub-request to forward
    pub request: GqlRequest,
    /// Path into the remote response selecting the requested field
    pub result_path: Vec<String>,
}

/// An action step: invoke an operator-defined webhook resolver
#[derive(Debug, Clone)]
pub struct ActionStep {
    pub action_name: String,
    pub payload: Value,
    pub remote_joins: Option<RemoteJoins>,
}

/// One node of an execution plan
#[derive(Debug, Clone)]
pub enum PlanStep {
    Db(DbStep),
    Remote(RemoteStep),
    Action(ActionStep),
    /// Literal JSON embedded by the planner (introspection, typename-only)
    Raw(Value),
}

/// Plan for a query operation
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Field name → step, in response order
    pub fields: Vec<(String, PlanStep)>,
    /// Cache TTL directive attached by the planner, seconds
    pub cache_ttl_secs: Option<u64>,
    /// Session variables the plan actually references
    ///
    /// Only these participate in the result-cache key.
    pub session_vars_used: Vec<String>,
}

/// Plan for a mutation operation
#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub fields: Vec<(String, PlanStep)>,
}

impl MutationPlan {
    /// When every step is a database step on one `(backend, source)` pair,
    /// return the statements so they can run inside a single transaction.
    pub fn single_source_batch(&self) -> Option<(BackendTag, String, Vec<(String, String)>)> {
        let mut target: Option<(BackendTag, String)> = None;
        let mut statements = Vec::with_capacity(self.fields.len());

        for (field, step) in &self.fields {
            let PlanStep::Db(db) = step else {
                return None;
            };
            match &target {
                None => target = Some((db.backend, db.source.clone())),
                Some((backend, source)) => {
                    if *backend != db.backend || *source != db.source {
                        return None;
                    }
                }
            }
            statements.push((field.clone(), db.generated_sql.clone()));
        }

        target.map(|(backend, source)| (backend, source, statements))
    }
}

/// Backend live-query plan handed to the poller
#[derive(Debug, Clone)]
pub struct SourcePlan {
    pub backend: BackendTag,
    pub source: String,
    /// Poller-interpreted plan payload
    pub plan: Value,
}

/// Builds the live-query plan for the current async-action log state
///
/// Subscriptions that mix a source-backed selection with async-action fields
/// are rebuilt whenever new action results land; the builder closes over the
/// plan's immutable context so the rebuild needs nothing but the fresh log.
pub type SourcePlanBuilder = Arc<dyn Fn(&ActionLogMap) -> SourcePlan + Send + Sync>;

/// Plan for a subscription operation
#[derive(Clone)]
pub struct SubscriptionPlan {
    /// Async actions whose log entries feed this subscription
    pub async_actions: Vec<ActionId>,
    /// Present when the subscription also selects source-backed fields
    pub source_backed: Option<SourcePlanBuilder>,
}

impl fmt::Debug for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionPlan")
            .field("async_actions", &self.async_actions)
            .field("source_backed", &self.source_backed.is_some())
            .finish()
    }
}

/// The three plan shapes the planner produces
#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    Query(QueryPlan),
    Mutation(MutationPlan),
    Subscription(SubscriptionPlan),
}

/// Turns a parsed request into an execution plan
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        user: &UserInfo,
        schema: &GatewaySchema,
        request: &ParsedRequest,
    ) -> Result<(QueryHash, ExecutionPlan), PlanError>;
}
