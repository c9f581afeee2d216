//! Remote agent — delegates an invocation to another agent over the wire.
//!
//! Converts the invocation into a `message/stream` call, rewrites each wire
//! event back into internal events, and closes its stream when the remote
//! task reaches a terminal state. Cancelling the invocation issues a
//! `tasks/cancel` against the remote endpoint.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use aw_agent::{Agent, EventStream, InvocationContext};
use aw_domain::{Content, Event, Part, Result, Role};

use crate::client::A2aClient;
use crate::convert::wire_part_to_internal;
use crate::types::{
    MessageSendParams, StreamResult, TaskState, WireMessage, WirePart, WireRole,
};

/// An [`Agent`] proxy for an endpoint speaking the wire protocol.
pub struct RemoteAgent {
    name: String,
    description: String,
    client: Arc<A2aClient>,
}

impl RemoteAgent {
    pub fn new(name: impl Into<String>, client: Arc<A2aClient>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            client,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

fn outbound_message(ctx: &InvocationContext) -> WireMessage {
    let parts: Vec<WirePart> = ctx
        .user_content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .map(crate::convert::internal_part_to_wire)
                .collect()
        })
        .unwrap_or_default();
    WireMessage {
        kind: "message".into(),
        message_id: uuid::Uuid::new_v4().to_string(),
        role: WireRole::User,
        parts,
        task_id: None,
        context_id: Some(ctx.session.id.clone()),
        reference_task_ids: Vec::new(),
        metadata: serde_json::Map::new(),
        extensions: Vec::new(),
    }
}

/// Rewrite one wire event into an internal event, if it carries anything.
fn wire_to_event(result: &StreamResult, invocation_id: &str, author: &str) -> Option<Event> {
    match result {
        StreamResult::StatusUpdate(update) => {
            let mut event = Event::new(invocation_id, author);
            if let Some(message) = &update.status.message {
                event.content = Some(Content {
                    role: Role::Model,
                    parts: message.parts.iter().map(wire_part_to_internal).collect(),
                });
            }
            match update.status.state {
                TaskState::Failed => {
                    event.error_code = Some("REMOTE_ERROR".into());
                    event.error_message = Some(
                        update
                            .status
                            .message
                            .as_ref()
                            .map(|m| m.text())
                            .unwrap_or_else(|| "remote task failed".into()),
                    );
                }
                TaskState::Canceled | TaskState::Rejected => {
                    event.interrupted = true;
                }
                TaskState::Completed => {
                    event.turn_complete = true;
                }
                TaskState::Submitted
                | TaskState::Working
                | TaskState::InputRequired
                | TaskState::AuthRequired => {}
            }
            (event.content.is_some() || update.final_).then_some(event)
        }
        StreamResult::ArtifactUpdate(update) => {
            let mut data = serde_json::Map::new();
            data.insert("artifactId".into(), json!(update.artifact.artifact_id));
            if let Some(name) = &update.artifact.name {
                data.insert("name".into(), json!(name));
            }
            let event = Event::new(invocation_id, author).with_content(
                Content::new(Role::Model).with_part(Part::data(data)),
            );
            Some(event)
        }
        StreamResult::Message(message) => {
            let event = Event::new(invocation_id, author).with_content(Content {
                role: Role::Model,
                parts: message.parts.iter().map(wire_part_to_internal).collect(),
            });
            Some(event)
        }
        StreamResult::Task(_) => None,
    }
}

#[async_trait::async_trait]
impl Agent for RemoteAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, ctx: InvocationContext) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(ctx.run_config.queue_buffer.max(1));
        let client = self.client.clone();
        let author = self.name.clone();
        let params = MessageSendParams {
            message: outbound_message(&ctx),
            metadata: serde_json::Map::new(),
        };

        tokio::spawn(async move {
            let invocation_id = ctx.invocation_id.clone();
            let remote_task_id: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

            // Bridge the sync stream handler to the async event channel.
            let (etx, mut erx) = mpsc::unbounded_channel::<Event>();
            let forward_tx = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(event) = erx.recv().await {
                    if forward_tx.send(event).await.is_err() {
                        break;
                    }
                }
            });

            // Inner scope: the stream future (and with it the bridge
            // sender) must drop before the forwarder is awaited.
            let result = {
                let handler_task_id = remote_task_id.clone();
                let handler_author = author.clone();
                let handler_invocation = invocation_id.clone();
                let stream_fut = client.send_message_stream(params, move |wire| {
                    if let StreamResult::StatusUpdate(update) = &wire {
                        *handler_task_id.lock() = Some(update.task_id.clone());
                    }
                    if let Some(event) =
                        wire_to_event(&wire, &handler_invocation, &handler_author)
                    {
                        let _ = etx.send(event);
                    }
                    Ok(())
                });
                tokio::pin!(stream_fut);

                let cancel = ctx.cancel.clone();
                loop {
                    tokio::select! {
                        result = &mut stream_fut => break result,
                        _ = tokio::time::sleep(Duration::from_millis(25)) => {
                            if cancel.is_cancelled() {
                                let task_id = remote_task_id.lock().clone();
                                if let Some(task_id) = task_id {
                                    if let Err(e) = client.cancel_task(&task_id).await {
                                        tracing::warn!(error = %e, "remote cancel failed");
                                    }
                                }
                                let _ = tx.send(
                                    Event::new(&invocation_id, &author).interrupted(true),
                                ).await;
                                forwarder.abort();
                                return;
                            }
                        }
                    }
                }
            };

            if let Err(e) = result {
                let _ = tx
                    .send(
                        Event::new(&invocation_id, &author)
                            .with_error("REMOTE_ERROR", e.to_string()),
                    )
                    .await;
            }
            let _ = forwarder.await;
        });

        Ok(rx)
    }
}
