//! Process-wide environment injected into every connection

use crate::backend::BackendRegistry;
use crate::config::GatewayConfig;
use crate::core::allowlist::AllowlistChecker;
use crate::core::auth::Authenticator;
use crate::core::schema::SchemaCache;
use crate::plan::Planner;
use crate::plan::cache::{InMemoryResultCache, ResultCache};
use crate::poller::LiveQueryPoller;
use crate::remote::{NoopRemoteJoins, RemoteJoinProcessor, RemoteSchemaClient};
use crate::server::metrics::GatewayMetrics;
use anyhow::Result;
use std::sync::Arc;

/// Everything a connection needs beyond its own descriptor
///
/// Built once at startup and shared by reference. All collaborator seams are
/// trait objects so deployments (and tests) can swap implementations.
pub struct WsEnvironment {
    pub config: GatewayConfig,
    pub authenticator: Arc<dyn Authenticator>,
    pub planner: Arc<dyn Planner>,
    pub schema_cache: Arc<SchemaCache>,
    pub allowlist: Arc<AllowlistChecker>,
    pub backends: BackendRegistry,
    pub actions: Arc<dyn crate::action::ActionExecutor>,
    pub remote: RemoteSchemaClient,
    pub remote_joins: Arc<dyn RemoteJoinProcessor>,
    pub poller: Arc<dyn LiveQueryPoller>,
    pub result_cache: Arc<dyn ResultCache>,
    pub metrics: Arc<GatewayMetrics>,
}

impl WsEnvironment {
    pub fn builder() -> WsEnvironmentBuilder {
        WsEnvironmentBuilder::new()
    }
}

/// Fluent builder for [`WsEnvironment`]
///
/// # Example
///
/// ```ignore
/// let env = WsEnvironment::builder()
///     .with_config(config)
///     .with_authenticator(Arc::new(AdminSecretAuthenticator::new(secret)))
///     .with_planner(planner)
///     .with_actions(actions)
///     .with_poller(poller)
///     .build()?;
/// ```
pub struct WsEnvironmentBuilder {
    config: GatewayConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    planner: Option<Arc<dyn Planner>>,
    schema_cache: Option<Arc<SchemaCache>>,
    allowlist: Option<Arc<AllowlistChecker>>,
    backends: BackendRegistry,
    actions: Option<Arc<dyn crate::action::ActionExecutor>>,
    remote: Option<RemoteSchemaClient>,
    remote_joins: Option<Arc<dyn RemoteJoinProcessor>>,
    poller: Option<Arc<dyn LiveQueryPoller>>,
    result_cache: Option<Arc<dyn ResultCache>>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl WsEnvironmentBuilder {
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            authenticator: None,
            planner: None,
            schema_cache: None,
            allowlist: None,
            backends: BackendRegistry::new(),
            actions: None,
            remote: None,
            remote_joins: None,
            poller: None,
            result_cache: None,
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.schema_cache = Some(cache);
        self
    }

    pub fn with_allowlist(mut self, allowlist: Arc<AllowlistChecker>) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_actions(mut self, actions: Arc<dyn crate::action::ActionExecutor>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_remote_client(mut self, remote: RemoteSchemaClient) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_remote_joins(mut self, processor: Arc<dyn RemoteJoinProcessor>) -> Self {
        self.remote_joins = Some(processor);
        self
    }

    pub fn with_poller(mut self, poller: Arc<dyn LiveQueryPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn with_result_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.result_cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Assemble the environment
    ///
    /// The authenticator, planner, action executor, and poller have no
    /// sensible defaults and must be provided; everything else falls back to
    /// an in-process implementation.
    pub fn build(self) -> Result<Arc<WsEnvironment>> {
        self.config.validate()?;

        let authenticator = self
            .authenticator
            .ok_or_else(|| anyhow::anyhow!("an Authenticator is required. Call .with_authenticator()"))?;
        let planner = self
            .planner
            .ok_or_else(|| anyhow::anyhow!("a Planner is required. Call .with_planner()"))?;
        let actions = self
            .actions
            .ok_or_else(|| anyhow::anyhow!("an ActionExecutor is required. Call .with_actions()"))?;
        let poller = self
            .poller
            .ok_or_else(|| anyhow::anyhow!("a LiveQueryPoller is required. Call .with_poller()"))?;

        Ok(Arc::new(WsEnvironment {
            config: self.config,
            authenticator,
            planner,
            schema_cache: self.schema_cache.unwrap_or_default(),
            allowlist: self.allowlist.unwrap_or_default(),
            backends: self.backends,
            actions,
            remote: self.remote.unwrap_or_default(),
            remote_joins: self
                .remote_joins
                .unwrap_or_else(|| Arc::new(NoopRemoteJoins)),
            poller,
            result_cache: self
                .result_cache
                .unwrap_or_else(|| Arc::new(InMemoryResultCache::new())),
            metrics: self.metrics.unwrap_or_default(),
        }))
    }
}

impl Default for WsEnvironmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
