//! Shared fixtures for the WebSocket transport tests
//!
//! Provides stub implementations of every collaborator seam — planner,
//! poller, backend transport, action executor — plus helpers to start a real
//! server on an ephemeral port and drive it with a tungstenite client.

use async_trait::async_trait;
use axum::http::HeaderMap;
use futures_util::StreamExt;
use gqlgate::action::{ActionExecutor, ActionId, ActionLogMap};
use gqlgate::backend::{BackendRegistry, BackendTag, BackendTransport, StepContext, StepResponse};
use gqlgate::config::GatewayConfig;
use gqlgate::core::auth::{AuthOutcome, Authenticator, UserInfo};
use gqlgate::core::error::{AuthError, ExecutionError, PlanError};
use gqlgate::core::{GatewaySchema, ParsedRequest, QueryKind};
use gqlgate::plan::{ActionStep, ExecutionPlan, Planner, QueryHash, SourcePlan};
use gqlgate::poller::{
    AsyncActionCallbacks, LiveQueryEvent, LiveQueryId, LiveQueryPoller, OnChange,
    SubscriberMetadata,
};
use gqlgate::server::{WsEnvironment, ws_router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as TtMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ── Stub planner ─────────────────────────────────────────────────────────

/// Planner serving canned plans keyed by exact query text
///
/// Records the dialect of every request it plans, so tests can assert the
/// handshake path reached the planner seam.
pub struct StubPlanner {
    plans: std::sync::Mutex<HashMap<String, ExecutionPlan>>,
    dialects: std::sync::Mutex<Vec<QueryKind>>,
}

impl StubPlanner {
    pub fn new() -> Self {
        Self {
            plans: std::sync::Mutex::new(HashMap::new()),
            dialects: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, query: &str, plan: ExecutionPlan) {
        self.plans.lock().unwrap().insert(query.to_string(), plan);
    }

    pub fn seen_dialects(&self) -> Vec<QueryKind> {
        self.dialects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for StubPlanner {
    async fn plan(
        &self,
        _user: &UserInfo,
        _schema: &GatewaySchema,
        request: &ParsedRequest,
    ) -> Result<(QueryHash, ExecutionPlan), PlanError> {
        self.dialects.lock().unwrap().push(request.dialect);
        let plans = self.plans.lock().unwrap();
        match plans.get(&request.raw.query) {
            Some(plan) => {
                let mut hasher = DefaultHasher::new();
                request.raw.query.hash(&mut hasher);
                Ok((
                    QueryHash(format!("{:016x}", hasher.finish())),
                    plan.clone(),
                ))
            }
            None => Err(PlanError::Internal {
                message: format!("no stub plan for query: {}", request.raw.query),
            }),
        }
    }
}

// ── Recording poller ─────────────────────────────────────────────────────

/// One recorded `add_live_query` call
#[derive(Clone)]
pub struct AddRecord {
    pub id: LiveQueryId,
    pub query_hash: QueryHash,
    pub operation_id: String,
    pub operation_name: Option<String>,
}

#[derive(Default)]
struct PollerState {
    live: HashMap<LiveQueryId, OnChange>,
    adds: Vec<AddRecord>,
    removes: Vec<LiveQueryId>,
    async_watches: Vec<(String, Vec<ActionId>, AsyncActionCallbacks)>,
}

/// Poller double that records every call and lets tests push events
pub struct RecordingPoller {
    state: Mutex<PollerState>,
}

impl RecordingPoller {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PollerState::default()),
        }
    }

    pub async fn adds(&self) -> Vec<AddRecord> {
        self.state.lock().await.adds.clone()
    }

    pub async fn removes(&self) -> Vec<LiveQueryId> {
        self.state.lock().await.removes.clone()
    }

    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live.len()
    }

    pub async fn async_watch_count(&self) -> usize {
        self.state.lock().await.async_watches.len()
    }

    /// Drive the on-change callback of a registration, as the real poller
    /// would on a poll result
    pub async fn push(&self, id: LiveQueryId, event: LiveQueryEvent) {
        let callback = {
            let state = self.state.lock().await;
            state.live.get(&id).cloned()
        };
        if let Some(callback) = callback {
            callback(event).await;
        }
    }

    /// Deliver async-action results to every watcher of an operation id
    pub async fn complete_actions(&self, operation_id: &str, logs: ActionLogMap) {
        let callbacks: Vec<AsyncActionCallbacks> = {
            let state = self.state.lock().await;
            state
                .async_watches
                .iter()
                .filter(|(op, _, _)| op == operation_id)
                .map(|(_, _, cb)| cb.clone())
                .collect()
        };
        for callback in callbacks {
            (callback.on_result)(logs.clone()).await;
        }
    }
}

#[async_trait]
impl LiveQueryPoller for RecordingPoller {
    async fn add_live_query(
        &self,
        subscriber: SubscriberMetadata,
        query_hash: QueryHash,
        _request_id: Uuid,
        _plan: SourcePlan,
        on_change: OnChange,
    ) -> Result<LiveQueryId, ExecutionError> {
        let id = LiveQueryId::fresh();
        let mut state = self.state.lock().await;
        state.live.insert(id, on_change);
        state.adds.push(AddRecord {
            id,
            query_hash,
            operation_id: subscriber.operation_id,
            operation_name: subscriber.operation_name,
        });
        Ok(id)
    }

    async fn remove_live_query(&self, id: LiveQueryId) {
        let mut state = self.state.lock().await;
        state.live.remove(&id);
        state.removes.push(id);
    }

    async fn add_async_actions(
        &self,
        subscriber: SubscriberMetadata,
        actions: Vec<ActionId>,
        callbacks: AsyncActionCallbacks,
    ) -> Result<(), ExecutionError> {
        self.state
            .lock()
            .await
            .async_watches
            .push((subscriber.operation_id, actions, callbacks));
        Ok(())
    }
}

// ── Counting backend ─────────────────────────────────────────────────────

/// Transport answering every statement with a canned row, counting calls
pub struct CountingBackend {
    pub query_calls: AtomicUsize,
    pub mutation_calls: AtomicUsize,
    pub tx_calls: AtomicUsize,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self {
            query_calls: AtomicUsize::new(0),
            mutation_calls: AtomicUsize::new(0),
            tx_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BackendTransport for CountingBackend {
    async fn run_query(
        &self,
        ctx: &StepContext,
        generated_sql: &str,
    ) -> Result<StepResponse, ExecutionError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
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
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepResponse {
            body: json!({ "field": ctx.field_name, "sql": generated_sql }),
            io_time: Duration::from_millis(1),
        })
    }

    async fn run_mutations_in_tx(
        &self,
        _ctx: &StepContext,
        statements: &[(String, String)],
    ) -> Result<Vec<(String, StepResponse)>, ExecutionError> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        Ok(statements
            .iter()
            .map(|(field, sql)| {
                (
                    field.clone(),
                    StepResponse {
                        body: json!({ "field": field, "sql": sql }),
                        io_time: Duration::from_millis(1),
                    },
                )
            })
            .collect())
    }
}

// ── Null actions ─────────────────────────────────────────────────────────

/// Action executor whose log always answers with null entries
pub struct NullActions;

#[async_trait]
impl ActionExecutor for NullActions {
    async fn run(
        &self,
        step: &ActionStep,
        _ctx: &StepContext,
        _headers: &HeaderMap,
    ) -> Result<StepResponse, ExecutionError> {
        Err(ExecutionError::Action {
            action: step.action_name.clone(),
            message: "actions are not wired in this test".to_string(),
        })
    }

    async fn fetch_action_logs(&self, ids: &[ActionId]) -> Result<ActionLogMap, ExecutionError> {
        Ok(ids.iter().map(|id| (*id, Value::Null)).collect())
    }
}

// ── Counting authenticator ───────────────────────────────────────────────

/// Admits everyone, counting how often it was consulted
pub struct CountingAuthenticator {
    pub calls: AtomicUsize,
}

impl CountingAuthenticator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Authenticator for CountingAuthenticator {
    async fn resolve(&self, _headers: &HeaderMap) -> Result<AuthOutcome, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AuthOutcome {
            user: UserInfo::new("test"),
            token_expiry: None,
        })
    }
}

// ── Environment and server helpers ───────────────────────────────────────

pub struct TestHarness {
    pub env: Arc<WsEnvironment>,
    pub planner: Arc<StubPlanner>,
    pub poller: Arc<RecordingPoller>,
    pub backend: Arc<CountingBackend>,
    pub auth: Arc<CountingAuthenticator>,
}

/// Build an environment with every seam stubbed
pub fn build_harness(config: GatewayConfig) -> TestHarness {
    let planner = Arc::new(StubPlanner::new());
    let poller = Arc::new(RecordingPoller::new());
    let backend = Arc::new(CountingBackend::new());
    let auth = Arc::new(CountingAuthenticator::new());

    let mut backends = BackendRegistry::new();
    backends.register(BackendTag::Postgres, backend.clone());

    let env = WsEnvironment::builder()
        .with_config(config)
        .with_authenticator(auth.clone())
        .with_planner(planner.clone())
        .with_backends(backends)
        .with_actions(Arc::new(NullActions))
        .with_poller(poller.clone())
        .build()
        .expect("test environment should build");

    TestHarness {
        env,
        planner,
        poller,
        backend,
        auth,
    }
}

pub fn quiet_config() -> GatewayConfig {
    GatewayConfig {
        // Long enough that periodic keepalives never interleave with the
        // frames under test; the init path still sends the first ka.
        keep_alive_delay_secs: 300,
        ..GatewayConfig::default()
    }
}

/// Start the transport on an ephemeral port
pub async fn start_server(env: Arc<WsEnvironment>) -> SocketAddr {
    let app = ws_router(env);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Connect a client to one of the gateway paths
pub async fn connect(addr: SocketAddr, path: &str) -> WsClient {
    let (ws, _response) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .expect("websocket connect should succeed");
    ws
}

// ── Client-side frame helpers ────────────────────────────────────────────

pub async fn send_json(ws: &mut WsClient, value: Value) {
    use futures_util::SinkExt;
    ws.send(TtMessage::Text(value.to_string().into()))
        .await
        .expect("send should succeed");
}

/// Receive the next text frame as JSON
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        if let TtMessage::Text(text) = msg {
            return serde_json::from_str(&text).expect("server sent invalid JSON");
        }
    }
}

/// Receive the next non-keepalive frame as JSON
pub async fn recv_json_skip_ka(ws: &mut WsClient) -> Value {
    loop {
        let frame = recv_json(ws).await;
        if frame["type"] != "connection_ka" {
            return frame;
        }
    }
}

/// Assert that no frame mentioning `id` arrives within the window
pub async fn assert_no_frame_for(ws: &mut WsClient, id: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(msg)) => {
                let msg = msg.expect("websocket error");
                if let TtMessage::Text(text) = msg {
                    let frame: Value =
                        serde_json::from_str(&text).expect("server sent invalid JSON");
                    assert_ne!(
                        frame["id"].as_str(),
                        Some(id),
                        "unexpected frame for stopped operation: {}",
                        frame
                    );
                }
            }
        }
    }
}

/// Run `connection_init` and consume the ack/ka pair
pub async fn init_connection(ws: &mut WsClient) {
    send_json(ws, json!({"type": "connection_init", "payload": {}})).await;
    let ack = recv_json(ws).await;
    assert_eq!(ack["type"], "connection_ack", "expected ack, got {}", ack);
    let ka = recv_json(ws).await;
    assert_eq!(ka["type"], "connection_ka", "expected ka, got {}", ka);
}
