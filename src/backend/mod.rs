//! Backend dispatch for database plan steps
//!
//! Plan steps carry an opaque [`BackendTag`]; the [`BackendRegistry`] maps
//! each tag to the transport that knows how to run generated statements
//! against that kind of source. The transport implementations themselves
//! (connection pooling, wire protocols) live outside this crate — the
//! registry only routes.

use crate::core::UserInfo;
use crate::core::error::ExecutionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Which family of database a step targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTag {
    Postgres,
    Mysql,
    Sqlserver,
    Bigquery,
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendTag::Postgres => "postgres",
            BackendTag::Mysql => "mysql",
            BackendTag::Sqlserver => "sqlserver",
            BackendTag::Bigquery => "bigquery",
        };
        write!(f, "{}", name)
    }
}

/// Everything a transport needs to execute one step
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Request id attached to every log line this step produces
    pub request_id: Uuid,
    /// Top-level response key the step resolves
    pub field_name: String,
    /// Identity the statement runs as
    pub user: UserInfo,
    /// Named source within the backend family
    pub source: String,
    /// SQL-generation knobs in effect
    pub sql_gen: crate::config::SqlGenContext,
}

/// Result of one executed step
///
/// Response headers produced by a step are dropped here; the WebSocket
/// transport has no way to convey them.
#[derive(Debug, Clone)]
pub struct StepResponse {
    pub body: Value,
    /// Time spent waiting on the backend
    pub io_time: Duration,
}

/// Uniform interface over database transports
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Run a read-only generated statement
    async fn run_query(
        &self,
        ctx: &StepContext,
        generated_sql: &str,
    ) -> Result<StepResponse, ExecutionError>;

    /// Run a single mutating statement in its own transaction
    async fn run_mutation(
        &self,
        ctx: &StepContext,
        generated_sql: &str,
    ) -> Result<StepResponse, ExecutionError>;

    /// Run several mutating statements inside one transaction
    ///
    /// Statements are `(field_name, generated_sql)` pairs; the result carries
    /// the same field names so the caller can assemble the response map.
    async fn run_mutations_in_tx(
        &self,
        ctx: &StepContext,
        statements: &[(String, String)],
    ) -> Result<Vec<(String, StepResponse)>, ExecutionError>;
}

/// Capability table from backend tag to transport
pub struct BackendRegistry {
    transports: HashMap<BackendTag, Arc<dyn BackendTransport>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            transports: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: BackendTag, transport: Arc<dyn BackendTransport>) {
        self.transports.insert(tag, transport);
    }

    /// Pick the transport for a tag
    pub fn transport(&self, tag: BackendTag) -> Result<Arc<dyn BackendTransport>, ExecutionError> {
        self.transports
            .get(&tag)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownBackend {
                tag: tag.to_string(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTransport;

    #[async_trait]
    impl BackendTransport for EchoTransport {
        async fn run_query(
            &self,
            ctx: &StepContext,
            generated_sql: &str,
        ) -> Result<StepResponse, ExecutionError> {
            Ok(StepResponse {
                body: json!({ "field": ctx.field_name, "sql": generated_sql }),
                io_time: Duration::from_millis(1),
            })
        }

        async fn run_mutation(
            &self,
            ctx: &StepContext,
            generated_sql: &str,
        ) -> Result<StepResponse, ExecutionError> {
            self.run_query(ctx, generated_sql).await
        }

        async fn run_mutations_in_tx(
            &self,
            ctx: &StepContext,
            statements: &[(String, String)],
        ) -> Result<Vec<(String, StepResponse)>, ExecutionError> {
            let mut out = Vec::with_capacity(statements.len());
            for (field, sql) in statements {
                let mut step_ctx = ctx.clone();
                step_ctx.field_name = field.clone();
                out.push((field.clone(), self.run_query(&step_ctx, sql).await?));
            }
            Ok(out)
        }
    }

    fn test_ctx() -> StepContext {
        StepContext {
            request_id: Uuid::new_v4(),
            field_name: "foo".to_string(),
            user: UserInfo::new("user"),
            source: "default".to_string(),
            sql_gen: Default::default(),
        }
    }

    #[test]
    fn test_unknown_tag_errors() {
        let registry = BackendRegistry::new();
        let err = registry.transport(BackendTag::Postgres).err().unwrap();
        assert!(matches!(err, ExecutionError::UnknownBackend { .. }));
        assert!(err.to_string().contains("postgres"));
    }

    #[tokio::test]
    async fn test_registered_transport_dispatches() {
        let mut registry = BackendRegistry::new();
        registry.register(BackendTag::Postgres, Arc::new(EchoTransport));

        let transport = registry.transport(BackendTag::Postgres).unwrap();
        let resp = transport
            .run_query(&test_ctx(), "SELECT 1")
            .await
            .expect("echo transport should succeed");
        assert_eq!(resp.body["sql"], "SELECT 1");
    }

    #[tokio::test]
    async fn test_tx_batch_preserves_field_names() {
        let transport = EchoTransport;
        let statements = vec![
            ("first".to_string(), "INSERT 1".to_string()),
            ("second".to_string(), "INSERT 2".to_string()),
        ];
        let results = transport
            .run_mutations_in_tx(&test_ctx(), &statements)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "first");
        assert_eq!(results[1].1.body["sql"], "INSERT 2");
    }
}
