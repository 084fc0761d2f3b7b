//! Operation dispatch
//!
//! Routes each decoded client message to its effect: `connection_init`
//! resolves the user and fixes the connection state, `start` vets the
//! request, plans it, and executes the plan shape it got back, `stop` tears a
//! subscription down. Failures here terminate the operation, never the
//! socket — the reader loop keeps running after any error this module
//! reports.
//!
//! Message handlers run serially within the reader task, so nothing in this
//! module re-enters for one connection. The one compound step that must not
//! be torn apart — poller registration followed by the registry insert — has
//! no await points in between besides the registration itself, and unwinds
//! the registration when the insert loses.

use crate::backend::StepContext;
use crate::core::error::{ExecutionError, ProtocolError};
use crate::core::request::{GqlRequest, ParsedRequest};
use crate::core::{RequestError, UserInfo};
use crate::plan::cache::cache_key;
use crate::plan::{
    ExecutionPlan, MutationPlan, PlanStep, QueryHash, QueryPlan, SourcePlanBuilder,
    SubscriptionPlan,
};
use crate::poller::{
    AsyncActionCallbacks, LiveQueryEvent, OnChange, SubscriberMetadata,
};
use crate::server::connection::{AuthPhase, OperationEntry, WsConnection};
use crate::server::environment::WsEnvironment;
use crate::server::handshake::{ErrorStyle, merge_init_headers};
use crate::server::log::{
    OperationDetails, OperationLogKind, WsConnInfo, WsEvent, log_ws_event,
};
use crate::server::protocol::{InitPayload, ServerMessage};
use axum::http::HeaderMap;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

// ── Error rendering ──────────────────────────────────────────────────────

/// One GraphQL error object with a machine-readable code
fn graphql_error(message: &str, code: &str) -> Value {
    json!({
        "message": message,
        "extensions": { "code": code }
    })
}

/// Render an error payload in the connection's error style
fn styled_error(style: ErrorStyle, error: Value) -> Value {
    match style {
        ErrorStyle::Legacy => error,
        ErrorStyle::Compliant => json!({ "errors": [error] }),
    }
}

// ── Logging helpers ──────────────────────────────────────────────────────

pub(crate) async fn conn_info(conn: &WsConnection) -> WsConnInfo {
    let mut info = WsConnInfo::new(conn.id);
    info.token_expiry = conn.token_expiry().await;
    info
}

async fn log_operation(conn: &WsConnection, details: OperationDetails) {
    let user_vars = conn.session_vars().await;
    log_ws_event(
        user_vars.as_ref(),
        &conn_info(conn).await,
        &WsEvent::Operation(details),
    );
}

// ── connection_init ──────────────────────────────────────────────────────

/// Process `connection_init`
///
/// A repeat on an already-initialised (or errored) connection is ignored
/// silently; the state variable only moves once.
pub(crate) async fn handle_connection_init(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    payload: Option<InitPayload>,
) {
    let Some(handshake_headers) = conn.handshake_headers().await else {
        tracing::debug!(ws_id = %conn.id, "ignoring repeated connection_init");
        return;
    };

    let auth_headers = match payload.and_then(|p| p.headers) {
        Some(extra) => merge_init_headers(&handshake_headers, &extra),
        None => handshake_headers,
    };

    match env.authenticator.resolve(&auth_headers).await {
        Ok(outcome) => {
            conn.mark_initialised(outcome.user, outcome.token_expiry, auth_headers)
                .await;
            conn.send(ServerMessage::ConnectionAck).await;
            conn.send(ServerMessage::ConnectionKa).await;
        }
        Err(err) => {
            let message = err.to_string();
            conn.mark_init_error(message.clone()).await;
            log_ws_event(
                None,
                &conn_info(conn).await,
                &WsEvent::ConnectionError {
                    message: message.clone(),
                },
            );
            conn.send(ServerMessage::ConnectionError {
                payload: json!(message),
            })
            .await;
        }
    }
}

// ── start ────────────────────────────────────────────────────────────────

/// Process `start`
pub(crate) async fn handle_start(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    operation_id: String,
    payload: GqlRequest,
) {
    // Duplicate ids must not clobber the live operation; no `complete` is
    // sent because the original operation is still running.
    if conn.contains_operation(&operation_id).await {
        let err = ProtocolError::DuplicateOperation {
            operation_id: operation_id.clone(),
        };
        conn.send(ServerMessage::Error {
            id: operation_id.clone(),
            payload: styled_error(
                conn.error_style,
                graphql_error(&err.to_string(), err.error_code()),
            ),
        })
        .await;
        log_operation(
            conn,
            OperationDetails::new(OperationLogKind::ProtoErr, &operation_id)
                .with_error(json!(err.to_string())),
        )
        .await;
        return;
    }

    let (user, forwarded_headers) = match conn.auth_phase().await {
        AuthPhase::Ready { user, headers } => (user, headers),
        AuthPhase::NotInitialised => {
            let err = ProtocolError::NotInitialised;
            fail_before_exec(
                conn,
                &operation_id,
                OperationLogKind::ProtoErr,
                graphql_error(&err.to_string(), err.error_code()),
            )
            .await;
            return;
        }
        AuthPhase::Failed { message } => {
            let err = ProtocolError::InitFailed { message };
            fail_before_exec(
                conn,
                &operation_id,
                OperationLogKind::QueryErr,
                graphql_error(&err.to_string(), err.error_code()),
            )
            .await;
            return;
        }
    };

    let request_id = Uuid::new_v4();

    let parsed = match ParsedRequest::parse(payload, conn.query_kind) {
        Ok(parsed) => parsed,
        Err(err) => {
            fail_before_exec(
                conn,
                &operation_id,
                OperationLogKind::QueryErr,
                graphql_error(&err.to_string(), err.error_code()),
            )
            .await;
            return;
        }
    };

    if env.config.enable_allowlist
        && !env.allowlist.is_allowed(
            &user.role,
            parsed.raw.operation_name.as_deref(),
            &parsed.raw.query,
        )
    {
        let err = RequestError::NotAllowed;
        fail_before_exec(
            conn,
            &operation_id,
            OperationLogKind::QueryErr,
            graphql_error(&err.to_string(), err.error_code()),
        )
        .await;
        return;
    }

    let (schema, _version) = env.schema_cache.get();
    let (query_hash, plan) = match env.planner.plan(&user, &schema, &parsed).await {
        Ok(planned) => planned,
        Err(err) => {
            fail_before_exec(
                conn,
                &operation_id,
                OperationLogKind::QueryErr,
                graphql_error(&err.to_string(), "PLAN_FAILED"),
            )
            .await;
            return;
        }
    };

    env.metrics.operation_started();

    let mut started = OperationDetails::new(OperationLogKind::Started, &operation_id);
    started.operation_name = parsed.raw.operation_name.clone();
    started.request_id = Some(request_id);
    started.parameterized_query_hash = Some(query_hash.0.clone());
    if let ExecutionPlan::Subscription(sub) = &plan
        && sub.source_backed.is_some()
        && sub.async_actions.is_empty()
    {
        // Pure source-backed subscriptions record their backing kind; mixed
        // ones historically do not.
        started.query_kind = Some("database");
    }
    log_operation(conn, started).await;

    match plan {
        ExecutionPlan::Query(query_plan) => {
            run_query_plan(
                env,
                conn,
                &operation_id,
                request_id,
                &user,
                &forwarded_headers,
                &parsed,
                query_plan,
            )
            .await;
        }
        ExecutionPlan::Mutation(mutation_plan) => {
            run_mutation_plan(
                env,
                conn,
                &operation_id,
                request_id,
                &user,
                &forwarded_headers,
                mutation_plan,
            )
            .await;
        }
        ExecutionPlan::Subscription(subscription_plan) => {
            run_subscription_plan(
                env,
                conn,
                operation_id,
                request_id,
                parsed.raw.operation_name.clone(),
                query_hash,
                subscription_plan,
            )
            .await;
        }
    }
}

/// Report a pre-execution failure: `error` then `complete`
async fn fail_before_exec(
    conn: &WsConnection,
    operation_id: &str,
    kind: OperationLogKind,
    error: Value,
) {
    conn.send(ServerMessage::Error {
        id: operation_id.to_string(),
        payload: styled_error(conn.error_style, error.clone()),
    })
    .await;
    conn.send(ServerMessage::Complete {
        id: operation_id.to_string(),
    })
    .await;
    log_operation(
        conn,
        OperationDetails::new(kind, operation_id).with_error(error),
    )
    .await;
}

// ── Query plans ──────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn run_query_plan(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    operation_id: &str,
    request_id: Uuid,
    user: &UserInfo,
    forwarded_headers: &HeaderMap,
    parsed: &ParsedRequest,
    plan: QueryPlan,
) {
    let key = cache_key(
        &parsed.raw,
        &user.role,
        &user.session,
        &plan.session_vars_used,
    );

    if let Some(cached) = env.result_cache.lookup(&key).await {
        conn.send(ServerMessage::Data {
            id: operation_id.to_string(),
            payload: cached,
        })
        .await;
        finish_operation(env, conn, operation_id).await;
        return;
    }

    let mut result = serde_json::Map::new();
    for (field_name, step) in &plan.fields {
        let ctx = step_context(request_id, field_name, user, env);
        match execute_query_step(env, &ctx, step, forwarded_headers).await {
            Ok(value) => {
                result.insert(field_name.clone(), value);
            }
            Err(err) => {
                fail_before_exec(
                    conn,
                    operation_id,
                    OperationLogKind::QueryErr,
                    graphql_error(&err.to_string(), err.error_code()),
                )
                .await;
                return;
            }
        }
    }

    let response = json!({ "data": Value::Object(result) });
    conn.send(ServerMessage::Data {
        id: operation_id.to_string(),
        payload: response.clone(),
    })
    .await;
    env.result_cache.store(key, response, plan.cache_ttl_secs).await;
    finish_operation(env, conn, operation_id).await;
}

async fn finish_operation(env: &WsEnvironment, conn: &WsConnection, operation_id: &str) {
    conn.send(ServerMessage::Complete {
        id: operation_id.to_string(),
    })
    .await;
    env.metrics.operation_completed();
    log_operation(
        conn,
        OperationDetails::new(OperationLogKind::Completed, operation_id),
    )
    .await;
}

fn step_context(
    request_id: Uuid,
    field_name: &str,
    user: &UserInfo,
    env: &WsEnvironment,
) -> StepContext {
    StepContext {
        request_id,
        field_name: field_name.to_string(),
        user: user.clone(),
        source: String::new(),
        sql_gen: env.config.sql_gen,
    }
}

/// Evaluate one step of a query plan
async fn execute_query_step(
    env: &WsEnvironment,
    ctx: &StepContext,
    step: &PlanStep,
    forwarded_headers: &HeaderMap,
) -> Result<Value, ExecutionError> {
    match step {
        PlanStep::Db(db) => {
            let transport = env.backends.transport(db.backend)?;
            let mut ctx = ctx.clone();
            ctx.source = db.source.clone();
            let response = transport.run_query(&ctx, &db.generated_sql).await?;
            tracing::debug!(
                request_id = %ctx.request_id,
                field = %ctx.field_name,
                io_ms = response.io_time.as_millis() as u64,
                "database step finished"
            );
            match &db.remote_joins {
                Some(joins) => {
                    env.remote_joins
                        .process(response.body, joins, forwarded_headers)
                        .await
                }
                None => Ok(response.body),
            }
        }
        PlanStep::Remote(remote) => env.remote.execute(remote, forwarded_headers).await,
        PlanStep::Action(action) => {
            let response = env.actions.run(action, ctx, forwarded_headers).await?;
            match &action.remote_joins {
                Some(joins) => {
                    env.remote_joins
                        .process(response.body, joins, forwarded_headers)
                        .await
                }
                None => Ok(response.body),
            }
        }
        PlanStep::Raw(value) => Ok(value.clone()),
    }
}

// ── Mutation plans ───────────────────────────────────────────────────────

async fn run_mutation_plan(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    operation_id: &str,
    request_id: Uuid,
    user: &UserInfo,
    forwarded_headers: &HeaderMap,
    plan: MutationPlan,
) {
    let outcome = execute_mutation_plan(env, request_id, user, forwarded_headers, &plan).await;

    match outcome {
        Ok(result) => {
            conn.send(ServerMessage::Data {
                id: operation_id.to_string(),
                payload: json!({ "data": Value::Object(result) }),
            })
            .await;
            finish_operation(env, conn, operation_id).await;
        }
        Err(err) => {
            fail_before_exec(
                conn,
                operation_id,
                OperationLogKind::QueryErr,
                graphql_error(&err.to_string(), err.error_code()),
            )
            .await;
        }
    }
}

/// Run the steps of a mutation plan, coalescing into one transaction when
/// every step targets the same relational source
async fn execute_mutation_plan(
    env: &WsEnvironment,
    request_id: Uuid,
    user: &UserInfo,
    forwarded_headers: &HeaderMap,
    plan: &MutationPlan,
) -> Result<serde_json::Map<String, Value>, ExecutionError> {
    if let Some((backend, source, statements)) = plan.single_source_batch() {
        let transport = env.backends.transport(backend)?;
        let mut ctx = step_context(request_id, "", user, env);
        ctx.source = source;
        let responses = transport.run_mutations_in_tx(&ctx, &statements).await?;

        let mut result = serde_json::Map::new();
        for (field_name, response) in responses {
            result.insert(field_name, response.body);
        }
        return Ok(result);
    }

    let mut result = serde_json::Map::new();
    for (field_name, step) in &plan.fields {
        let ctx = step_context(request_id, field_name, user, env);
        let value = match step {
            PlanStep::Db(db) => {
                let transport = env.backends.transport(db.backend)?;
                let mut ctx = ctx.clone();
                ctx.source = db.source.clone();
                let response = transport.run_mutation(&ctx, &db.generated_sql).await?;
                match &db.remote_joins {
                    Some(joins) => {
                        env.remote_joins
                            .process(response.body, joins, forwarded_headers)
                            .await?
                    }
                    None => response.body,
                }
            }
            other => execute_query_step(env, &ctx, other, forwarded_headers).await?,
        };
        result.insert(field_name.clone(), value);
    }
    Ok(result)
}

// ── Subscription plans ───────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn run_subscription_plan(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    operation_id: String,
    request_id: Uuid,
    operation_name: Option<String>,
    query_hash: QueryHash,
    plan: SubscriptionPlan,
) {
    let subscriber = SubscriberMetadata {
        ws_id: conn.id,
        operation_id: operation_id.clone(),
        operation_name: operation_name.clone(),
    };

    let Some(builder) = plan.source_backed else {
        run_async_only_subscription(env, conn, operation_id, plan.async_actions, subscriber)
            .await;
        return;
    };

    // Source-backed: seed the plan with the current action log state.
    let logs = if plan.async_actions.is_empty() {
        crate::action::ActionLogMap::new()
    } else {
        match env.actions.fetch_action_logs(&plan.async_actions).await {
            Ok(logs) => logs,
            Err(err) => {
                subscription_error(conn, &operation_id, &err).await;
                return;
            }
        }
    };

    let source_plan = builder(&logs);
    let on_change = make_on_change(conn.clone(), operation_id.clone());

    let live_query_id = match env
        .poller
        .add_live_query(
            subscriber.clone(),
            query_hash.clone(),
            request_id,
            source_plan,
            on_change.clone(),
        )
        .await
    {
        Ok(id) => id,
        Err(err) => {
            subscription_error(conn, &operation_id, &err).await;
            return;
        }
    };

    // Registration and the registry insert form one compound step: on the
    // losing side the registration is unwound, so no subscription can leak.
    let inserted = conn
        .insert_operation(
            &operation_id,
            OperationEntry {
                live_query_id,
                operation_name: operation_name.clone(),
            },
        )
        .await;
    if !inserted {
        env.poller.remove_live_query(live_query_id).await;
        let err = ProtocolError::DuplicateOperation {
            operation_id: operation_id.clone(),
        };
        conn.send(ServerMessage::Error {
            id: operation_id.clone(),
            payload: styled_error(
                conn.error_style,
                graphql_error(&err.to_string(), err.error_code()),
            ),
        })
        .await;
        log_operation(
            conn,
            OperationDetails::new(OperationLogKind::ProtoErr, &operation_id)
                .with_error(json!(err.to_string())),
        )
        .await;
        return;
    }

    if !plan.async_actions.is_empty() {
        register_restart_wrapper(
            env,
            conn,
            operation_id,
            request_id,
            subscriber,
            query_hash,
            builder,
            on_change,
            plan.async_actions,
        )
        .await;
    }
}

/// Subscription consisting solely of async-action fields
async fn run_async_only_subscription(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    operation_id: String,
    actions: Vec<crate::action::ActionId>,
    subscriber: SubscriberMetadata,
) {
    if actions.is_empty() {
        finish_operation(env, conn, &operation_id).await;
        return;
    }

    let registered_at = Instant::now();

    let result_conn = conn.clone();
    let result_op = operation_id.clone();
    let on_result: Arc<
        dyn Fn(crate::action::ActionLogMap) -> futures::future::BoxFuture<'static, ()>
            + Send
            + Sync,
    > = Arc::new(move |logs| {
        let conn = result_conn.clone();
        let id = result_op.clone();
        let elapsed_ms = registered_at.elapsed().as_millis() as u64;
        Box::pin(async move {
            let payload = json!({
                "data": marshal_action_logs(&logs),
                "extensions": { "elapsed_ms": elapsed_ms }
            });
            conn.send(ServerMessage::Data { id, payload }).await;
        })
    });

    let error_conn = conn.clone();
    let error_op = operation_id.clone();
    let error_style = conn.error_style;
    let on_error: Arc<
        dyn Fn(ExecutionError) -> futures::future::BoxFuture<'static, ()> + Send + Sync,
    > = Arc::new(move |err| {
        let conn = error_conn.clone();
        let id = error_op.clone();
        Box::pin(async move {
            tracing::error!(ws_id = %conn.id, operation_id = %id, error = %err, "async-action subscription failed");
            conn.send(ServerMessage::Error {
                id,
                payload: styled_error(
                    error_style,
                    graphql_error(&err.to_string(), err.error_code()),
                ),
            })
            .await;
        })
    });

    let callbacks = AsyncActionCallbacks {
        on_result,
        on_error,
    };

    if let Err(err) = env
        .poller
        .add_async_actions(subscriber, actions, callbacks)
        .await
    {
        subscription_error(conn, &operation_id, &err).await;
    }
}

/// Render an async-action log map as a response object keyed by action id
fn marshal_action_logs(logs: &crate::action::ActionLogMap) -> Value {
    let mut entries: Vec<(&crate::action::ActionId, &Value)> = logs.iter().collect();
    entries.sort_by_key(|(id, _)| **id);

    let mut out = serde_json::Map::new();
    for (id, value) in entries {
        out.insert(id.to_string(), value.clone());
    }
    Value::Object(out)
}

/// Subscription execution failure: `error` without `complete`, so a
/// transient poller failure does not end the operation from the client's
/// point of view
async fn subscription_error(conn: &WsConnection, operation_id: &str, err: &ExecutionError) {
    let error = graphql_error(&err.to_string(), err.error_code());
    conn.send(ServerMessage::Error {
        id: operation_id.to_string(),
        payload: styled_error(conn.error_style, error.clone()),
    })
    .await;
    log_operation(
        conn,
        OperationDetails::new(OperationLogKind::QueryErr, operation_id).with_error(error),
    )
    .await;
}

/// The per-push callback handed to the poller
///
/// Successful pushes become `data` frames with execution-time metadata;
/// failed pushes become `data` frames carrying the error payload. The
/// callback never emits `complete` — a subscription only ends on `stop`,
/// `connection_terminate`, or close. After close the queue is gone and sends
/// drop silently.
fn make_on_change(conn: Arc<WsConnection>, operation_id: String) -> OnChange {
    Arc::new(move |event| {
        let conn = conn.clone();
        let id = operation_id.clone();
        Box::pin(async move {
            let payload = match event {
                LiveQueryEvent::Data {
                    payload,
                    execution_time,
                } => attach_execution_time(payload, execution_time.as_millis() as u64),
                LiveQueryEvent::Error { payload } => payload,
            };
            conn.send(ServerMessage::Data { id, payload }).await;
        })
    })
}

fn attach_execution_time(payload: Value, execution_ms: u64) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert(
                "extensions".to_string(),
                json!({ "execution_time_ms": execution_ms }),
            );
            Value::Object(map)
        }
        other => other,
    }
}

/// Re-register the live query whenever new async-action results land
///
/// The rebuilt registration is installed before the old one is removed; if
/// the operation was stopped in between, the new registration is unwound
/// instead.
#[allow(clippy::too_many_arguments)]
async fn register_restart_wrapper(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    operation_id: String,
    request_id: Uuid,
    subscriber: SubscriberMetadata,
    query_hash: QueryHash,
    builder: SourcePlanBuilder,
    on_change: OnChange,
    actions: Vec<crate::action::ActionId>,
) {
    let restart_env = env.clone();
    let restart_conn = conn.clone();
    let restart_op = operation_id.clone();
    let restart_subscriber = subscriber.clone();

    let on_result: Arc<
        dyn Fn(crate::action::ActionLogMap) -> futures::future::BoxFuture<'static, ()>
            + Send
            + Sync,
    > = Arc::new(move |logs| {
        let env = restart_env.clone();
        let conn = restart_conn.clone();
        let operation_id = restart_op.clone();
        let subscriber = restart_subscriber.clone();
        let query_hash = query_hash.clone();
        let builder = builder.clone();
        let on_change = on_change.clone();
        Box::pin(async move {
            let new_plan = builder(&logs);
            match env
                .poller
                .add_live_query(subscriber, query_hash, request_id, new_plan, on_change)
                .await
            {
                Ok(new_id) => match conn.replace_live_query(&operation_id, new_id).await {
                    Some(old_id) => env.poller.remove_live_query(old_id).await,
                    // Stopped while we were rebuilding; drop the new one.
                    None => env.poller.remove_live_query(new_id).await,
                },
                Err(err) => {
                    tracing::error!(
                        ws_id = %conn.id,
                        operation_id = %operation_id,
                        error = %err,
                        "failed to restart live query after action results"
                    );
                    subscription_error(&conn, &operation_id, &err).await;
                }
            }
        })
    });

    let error_conn = conn.clone();
    let error_op = operation_id.clone();
    let on_error: Arc<
        dyn Fn(ExecutionError) -> futures::future::BoxFuture<'static, ()> + Send + Sync,
    > = Arc::new(move |err| {
        let conn = error_conn.clone();
        let id = error_op.clone();
        Box::pin(async move {
            tracing::error!(ws_id = %conn.id, operation_id = %id, error = %err, "async-action watch failed");
            subscription_error(&conn, &id, &err).await;
        })
    });

    if let Err(err) = env
        .poller
        .add_async_actions(
            subscriber,
            actions,
            AsyncActionCallbacks {
                on_result,
                on_error,
            },
        )
        .await
    {
        // The live query itself stays registered; the client just won't see
        // restarts on new action results.
        tracing::error!(ws_id = %conn.id, operation_id = %operation_id, error = %err, "failed to register restart wrapper");
        subscription_error(conn, &operation_id, &err).await;
    }
}

// ── stop ─────────────────────────────────────────────────────────────────

/// Process `stop`
///
/// Never answers with `error` or `complete`: an unknown id is routine (the
/// operation may have completed naturally, or the client is confused).
pub(crate) async fn handle_stop(
    env: &Arc<WsEnvironment>,
    conn: &Arc<WsConnection>,
    operation_id: &str,
) {
    match conn.remove_operation(operation_id).await {
        Some(entry) => {
            log_operation(
                conn,
                OperationDetails::new(OperationLogKind::Stopped, operation_id),
            )
            .await;
            env.poller.remove_live_query(entry.live_query_id).await;
        }
        None => {
            tracing::debug!(
                ws_id = %conn.id,
                operation_id = %operation_id,
                "stop for unknown operation id"
            );
        }
    }
}
