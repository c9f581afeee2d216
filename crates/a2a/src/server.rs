//! The JSON-RPC HTTP server: single requests, batches, and streaming.
//!
//! `POST /` accepts a single request or a batch (detected by the first
//! non-whitespace character). Streaming methods answer with chunked
//! `application/x-ndjson`, one JSON-RPC response per line sharing the
//! request id; dropping the connection cancels the running executor.
//! `GET /.well-known/agent.json` serves the agent card.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use aw_domain::ServerConfig;

use crate::error::A2aError;
use crate::executor::AgentExecutor;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use crate::queue::EventQueue;
use crate::task::TaskManager;
use crate::types::{
    AgentCard, MessageSendParams, StreamResult, TaskIdParams, TaskQueryParams,
    TaskPushNotificationConfig,
};

const STREAMING_METHODS: &[&str] = &["message/stream", "tasks/sendSubscribe", "tasks/resubscribe"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server & state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct ServerState {
    executor: Arc<AgentExecutor>,
    tasks: Arc<TaskManager>,
    card: AgentCard,
    queue_buffer: usize,
}

/// The wire-protocol server. Build a router for embedding, or `serve` it on
/// the configured listener.
pub struct A2aServer {
    state: ServerState,
    config: ServerConfig,
}

impl A2aServer {
    pub fn new(executor: Arc<AgentExecutor>, card: AgentCard, config: ServerConfig) -> Self {
        let tasks = executor.tasks().clone();
        Self {
            state: ServerState {
                executor,
                tasks,
                card,
                queue_buffer: 64,
            },
            config,
        }
    }

    pub fn queue_buffer(mut self, buffer: usize) -> Self {
        self.state.queue_buffer = buffer.max(1);
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(handle_rpc))
            .route("/.well-known/agent.json", get(handle_agent_card))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve until shutdown.
    pub async fn serve(self) -> std::io::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.config.bind).await?;
        tracing::info!(bind = %self.config.bind, "protocol server listening");
        axum::serve(listener, router).await
    }
}

async fn handle_agent_card(State(state): State<ServerState>) -> Json<AgentCard> {
    Json(state.card.clone())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_rpc(State(state): State<ServerState>, body: String) -> Response {
    if body.trim_start().starts_with('[') {
        handle_batch(state, &body).await
    } else {
        handle_single(state, &body).await
    }
}

fn error_response(id: Value, error: &A2aError) -> JsonRpcResponse {
    JsonRpcResponse::error(id, error.to_object())
}

/// Parse and validate one request value. The id (when present) is recovered
/// even from malformed envelopes so the error can be correlated.
fn parse_request(value: Value) -> Result<JsonRpcRequest, (Value, A2aError)> {
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| (id.clone(), A2aError::InvalidRequest(e.to_string())))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err((
            id,
            A2aError::InvalidRequest("jsonrpc must be '2.0'".into()),
        ));
    }
    Ok(request)
}

async fn handle_single(state: ServerState, body: &str) -> Response {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return Json(error_response(Value::Null, &A2aError::Parse(e.to_string())))
                .into_response();
        }
    };
    let request = match parse_request(value) {
        Ok(request) => request,
        Err((id, error)) => return Json(error_response(id, &error)).into_response(),
    };

    if STREAMING_METHODS.contains(&request.method.as_str()) {
        if request.is_notification() {
            // A stream without an id has no way to correlate responses.
            tracing::warn!(method = %request.method, "streaming notification rejected");
            return StatusCode::NO_CONTENT.into_response();
        }
        return handle_streaming(state, request).await;
    }

    if request.is_notification() {
        tokio::spawn(async move {
            let response = dispatch_sync(&state, request).await;
            if let Some(error) = &response.error {
                tracing::warn!(code = error.code, message = %error.message, "notification failed");
            }
        });
        return StatusCode::NO_CONTENT.into_response();
    }

    Json(dispatch_sync(&state, request).await).into_response()
}

async fn handle_batch(state: ServerState, body: &str) -> Response {
    let values: Vec<Value> = match serde_json::from_str(body) {
        Ok(values) => values,
        Err(e) => {
            return Json(error_response(Value::Null, &A2aError::Parse(e.to_string())))
                .into_response();
        }
    };
    if values.is_empty() {
        return Json(error_response(
            Value::Null,
            &A2aError::InvalidRequest("empty batch".into()),
        ))
        .into_response();
    }

    // Each element is validated independently and processed sequentially;
    // responses keep the original order.
    let mut responses = Vec::new();
    for value in values {
        let request = match parse_request(value) {
            Ok(request) => request,
            Err((id, error)) => {
                responses.push(error_response(id, &error));
                continue;
            }
        };
        if STREAMING_METHODS.contains(&request.method.as_str()) {
            responses.push(error_response(
                request.id.clone().unwrap_or(Value::Null),
                &A2aError::InvalidRequest("streaming methods are not allowed in a batch".into()),
            ));
            continue;
        }
        let notification = request.is_notification();
        let response = dispatch_sync(&state, request).await;
        if !notification {
            responses.push(response);
        }
    }

    if responses.is_empty() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        Json(responses).into_response()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-streaming dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, A2aError> {
    let params = params.ok_or_else(|| A2aError::InvalidParams("params are required".into()))?;
    serde_json::from_value(params).map_err(|e| A2aError::InvalidParams(e.to_string()))
}

fn validate_send_params(params: &MessageSendParams) -> Result<(), A2aError> {
    if params.message.message_id.is_empty() {
        return Err(A2aError::InvalidParams(
            "message.messageId must not be empty".into(),
        ));
    }
    Ok(())
}

async fn dispatch_sync(state: &ServerState, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone().unwrap_or(Value::Null);
    let result = match request.method.as_str() {
        // `tasks/send` is the deprecated alias; accepted, never emitted.
        "message/send" | "tasks/send" => handle_send(state, request.params).await,
        "tasks/get" => parse_params::<TaskQueryParams>(request.params).and_then(|params| {
            state
                .tasks
                .get(&params.id)
                .ok_or(A2aError::TaskNotFound(params.id))
                .and_then(|task| serde_json::to_value(task).map_err(Into::into))
        }),
        "tasks/cancel" => parse_params::<TaskIdParams>(request.params).and_then(|params| {
            state
                .tasks
                .cancel(&params.id)
                .and_then(|task| serde_json::to_value(task).map_err(Into::into))
        }),
        "tasks/pushNotificationConfig/set" => parse_params::<TaskPushNotificationConfig>(
            request.params,
        )
        .and_then(|config| {
            state
                .tasks
                .set_push_config(config)
                .and_then(|config| serde_json::to_value(config).map_err(Into::into))
        }),
        "tasks/pushNotificationConfig/get" => {
            parse_params::<TaskIdParams>(request.params).and_then(|params| {
                state
                    .tasks
                    .get_push_config(&params.id)
                    .and_then(|config| serde_json::to_value(config).map_err(Into::into))
            })
        }
        "agents/card" => serde_json::to_value(&state.card).map_err(Into::into),
        other => Err(A2aError::MethodNotFound(other.to_owned())),
    };

    match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(error) => error_response(id, &error),
    }
}

async fn handle_send(state: &ServerState, params: Option<Value>) -> Result<Value, A2aError> {
    let params: MessageSendParams = parse_params(params)?;
    validate_send_params(&params)?;

    let task_id = params
        .message
        .task_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state
        .tasks
        .create(&task_id, params.message.context_id.clone());

    // Non-streaming: drain the queue in the background and answer with the
    // terminal task snapshot.
    let (queue, mut rx) = EventQueue::<StreamResult>::channel(state.queue_buffer);
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let result = state.executor.execute(&params, &task_id, &queue).await;
    queue.close();
    let _ = drain.await;
    result?;

    let task = state
        .tasks
        .get(&task_id)
        .ok_or_else(|| A2aError::TaskNotFound(task_id))?;
    serde_json::to_value(task).map_err(Into::into)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancels the task when the response stream is dropped (client gone).
/// Cancelling an already-terminal task is a no-op signal.
struct CancelOnDrop {
    tasks: Arc<TaskManager>,
    task_id: String,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.tasks.cancel_token(&self.task_id) {
            token.cancel();
        }
    }
}

fn ndjson_line(id: &Value, result: &StreamResult) -> Bytes {
    let response = JsonRpcResponse::success(
        id.clone(),
        serde_json::to_value(result).unwrap_or(Value::Null),
    );
    let mut line = serde_json::to_string(&response).unwrap_or_default();
    line.push('\n');
    Bytes::from(line)
}

fn ndjson_response(
    stream: impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_streaming(state: ServerState, request: JsonRpcRequest) -> Response {
    let id = request.id.clone().unwrap_or(Value::Null);
    match request.method.as_str() {
        // `tasks/sendSubscribe` is the deprecated alias.
        "message/stream" | "tasks/sendSubscribe" => {
            let params: MessageSendParams = match parse_params(request.params)
                .and_then(|p: MessageSendParams| validate_send_params(&p).map(|_| p))
            {
                Ok(params) => params,
                Err(error) => return Json(error_response(id, &error)).into_response(),
            };
            stream_message(state, id, params)
        }
        "tasks/resubscribe" => {
            let params: TaskQueryParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(error) => return Json(error_response(id, &error)).into_response(),
            };
            resubscribe(state, id, params)
        }
        other => Json(error_response(
            id,
            &A2aError::MethodNotFound(other.to_owned()),
        ))
        .into_response(),
    }
}

fn stream_message(state: ServerState, id: Value, params: MessageSendParams) -> Response {
    let task_id = params
        .message
        .task_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state
        .tasks
        .create(&task_id, params.message.context_id.clone());

    let (queue, mut rx) = EventQueue::<StreamResult>::channel(state.queue_buffer);
    let executor = state.executor.clone();
    let exec_task_id = task_id.clone();
    tokio::spawn(async move {
        if let Err(e) = executor.execute(&params, &exec_task_id, &queue).await {
            tracing::warn!(task_id = %exec_task_id, error = %e, "executor failed");
        }
        queue.close();
    });

    let guard = CancelOnDrop {
        tasks: state.tasks.clone(),
        task_id,
    };
    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(ndjson_line(&id, &event));
        }
    };
    ndjson_response(stream)
}

fn resubscribe(state: ServerState, id: Value, params: TaskQueryParams) -> Response {
    let Some(task) = state.tasks.get(&params.id) else {
        return Json(error_response(id, &A2aError::TaskNotFound(params.id))).into_response();
    };
    let bus = state.tasks.subscribe(&params.id);

    let stream = async_stream::stream! {
        let terminal = task.status.state.is_terminal();
        yield Ok::<_, Infallible>(ndjson_line(&id, &StreamResult::Task(task)));
        if terminal {
            return;
        }
        let Some(mut bus) = bus else { return };
        loop {
            match bus.recv().await {
                Ok(event) => {
                    let is_final = matches!(
                        &event,
                        StreamResult::StatusUpdate(update) if update.final_
                    );
                    yield Ok::<_, Infallible>(ndjson_line(&id, &event));
                    if is_final {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "resubscribe stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    };
    ndjson_response(stream)
}
