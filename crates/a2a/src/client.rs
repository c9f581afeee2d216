//! HTTP client for the wire protocol, plus the agent-card resolver.

use futures_util::StreamExt;
use serde_json::Value;

use crate::jsonrpc::{JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};
use crate::types::{
    AgentCard, MessageSendParams, StreamResult, Task, TaskIdParams, TaskPushNotificationConfig,
    TaskQueryParams,
};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Rpc(#[from] JsonRpcErrorObject),

    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream aborted by handler: {0}")]
    Aborted(String),
}

/// A client bound to one remote agent endpoint.
pub struct A2aClient {
    http: reqwest::Client,
    url: String,
}

impl A2aClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_http_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(uuid::Uuid::new_v4().to_string(), method, Some(params))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let request = self.request(method, params);
        let response: JsonRpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;
        Ok(response.into_result()?)
    }

    /// Send a message and wait for the terminal task snapshot.
    pub async fn send_message(&self, params: MessageSendParams) -> Result<Task, ClientError> {
        let result = self
            .call("message/send", serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a message and stream the response events into `handler`. The
    /// server may frame lines as bare NDJSON or as SSE `data:` lines; both
    /// are accepted. A handler error aborts the stream.
    pub async fn send_message_stream<F>(
        &self,
        params: MessageSendParams,
        mut handler: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(StreamResult) -> Result<(), String>,
    {
        let request = self.request("message/stream", serde_json::to_value(&params)?);
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await?;

        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_owned();
                buffer.drain(..=newline);
                if line.is_empty() {
                    continue;
                }
                let payload = match line.strip_prefix("data:") {
                    Some(rest) => rest.trim(),
                    None if line.starts_with("event:")
                        || line.starts_with("id:")
                        || line.starts_with(':') =>
                    {
                        continue;
                    }
                    None => line.as_str(),
                };

                let response: JsonRpcResponse = serde_json::from_str(payload)?;
                let result = response.into_result()?;
                let event: StreamResult = serde_json::from_value(result)?;
                handler(event).map_err(ClientError::Aborted)?;
            }
        }
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, ClientError> {
        let params = TaskQueryParams {
            id: task_id.to_owned(),
            history_length: None,
        };
        let result = self
            .call("tasks/get", serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<Task, ClientError> {
        let params = TaskIdParams {
            id: task_id.to_owned(),
        };
        let result = self
            .call("tasks/cancel", serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn set_task_push_notification(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, ClientError> {
        let result = self
            .call(
                "tasks/pushNotificationConfig/set",
                serde_json::to_value(&config)?,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_task_push_notification(
        &self,
        task_id: &str,
    ) -> Result<TaskPushNotificationConfig, ClientError> {
        let params = TaskIdParams {
            id: task_id.to_owned(),
        };
        let result = self
            .call(
                "tasks/pushNotificationConfig/get",
                serde_json::to_value(&params)?,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Card resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const WELL_KNOWN_CARD_PATH: &str = "/.well-known/agent.json";

/// Fetches and parses a remote agent's card.
pub struct CardResolver {
    http: reqwest::Client,
    base_url: String,
    path: String,
}

impl CardResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            path: WELL_KNOWN_CARD_PATH.into(),
        }
    }

    /// Override the card path (default: the well-known location).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub async fn resolve(&self) -> Result<AgentCard, ClientError> {
        let url = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.path
        );
        let card = self.http.get(&url).send().await?.json().await?;
        Ok(card)
    }
}
