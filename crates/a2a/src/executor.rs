//! The executor — bridges an incoming wire message to an agent invocation
//! and feeds the resulting events onto the wire event queue.

use std::sync::Arc;

use aw_agent::{Agent, InvocationContext};
use aw_domain::RunConfig;
use aw_services::Services;

use crate::convert::{event_to_wire, wire_message_to_content};
use crate::error::A2aError;
use crate::queue::EventQueue;
use crate::task::TaskManager;
use crate::types::{MessageSendParams, StreamResult, TaskState, WireMessage};

/// Runs one agent per task and translates its events onto the wire.
pub struct AgentExecutor {
    agent: Arc<dyn Agent>,
    services: Services,
    run_config: RunConfig,
    tasks: Arc<TaskManager>,
    app_name: String,
}

impl AgentExecutor {
    pub fn new(
        agent: Arc<dyn Agent>,
        services: Services,
        run_config: RunConfig,
        tasks: Arc<TaskManager>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            services,
            run_config,
            tasks,
            app_name: app_name.into(),
        }
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Drive one `message/send`-style request to completion, enqueuing wire
    /// events as they happen. The task must already exist in the registry.
    pub async fn execute(
        &self,
        params: &MessageSendParams,
        task_id: &str,
        queue: &EventQueue<StreamResult>,
    ) -> Result<(), A2aError> {
        let context_id = params
            .message
            .context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let user_id = format!("A2A_USER_{context_id}");

        let sessions = self
            .services
            .session
            .clone()
            .ok_or_else(|| A2aError::Internal("no session service configured".into()))?;
        let session = sessions
            .create_session(&self.app_name, &user_id, Some(context_id.clone()))
            .await
            .map_err(|e| A2aError::Internal(e.to_string()))?;
        let session_key = session.key();

        // Record the inbound message and announce submission.
        self.tasks.create(task_id, Some(context_id.clone()));
        self.tasks.add_history(task_id, params.message.clone());
        let submitted = self
            .tasks
            .get(task_id)
            .ok_or_else(|| A2aError::TaskNotFound(task_id.to_owned()))?;
        let _ = queue
            .send(StreamResult::StatusUpdate(crate::types::TaskStatusUpdateEvent {
                task_id: task_id.to_owned(),
                context_id: Some(context_id.clone()),
                status: submitted.status.clone(),
                final_: false,
                metadata: serde_json::Map::new(),
            }))
            .await;

        let user_content = wire_message_to_content(&params.message);
        let mut ctx = InvocationContext::new(
            session,
            Some(user_content),
            self.services.clone(),
            self.run_config.clone(),
        );
        if let Some(token) = self.tasks.cancel_token(task_id) {
            ctx.cancel = token;
        }

        let mut stream = match self.agent.run(ctx).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(task_id, &context_id, queue, &e.to_string()).await;
                return Err(A2aError::Internal(e.to_string()));
            }
        };

        let mut terminal_seen = false;
        while let Some(event) = stream.recv().await {
            for wire_event in event_to_wire(&event, task_id, Some(&context_id), &session_key) {
                match &wire_event {
                    StreamResult::StatusUpdate(update) => {
                        if update.final_ {
                            terminal_seen = true;
                        }
                        let _ = self.tasks.update_status(
                            task_id,
                            update.status.state,
                            update.status.message.clone(),
                        );
                    }
                    StreamResult::ArtifactUpdate(update) => {
                        self.tasks.add_artifact(task_id, update.artifact.clone());
                    }
                    StreamResult::Task(_) | StreamResult::Message(_) => {}
                }
                self.tasks.publish(task_id, wire_event.clone());
                if queue.send(wire_event).await.is_err() {
                    // Consumer gone: cancel the invocation and stop.
                    tracing::debug!(task_id, "event consumer disconnected; cancelling");
                    if let Some(token) = self.tasks.cancel_token(task_id) {
                        token.cancel();
                    }
                    return Ok(());
                }
            }
        }

        if !terminal_seen {
            let task = self
                .tasks
                .update_status(task_id, TaskState::Completed, None)?;
            let update = StreamResult::StatusUpdate(crate::types::TaskStatusUpdateEvent {
                task_id: task_id.to_owned(),
                context_id: Some(context_id.clone()),
                status: task.status,
                final_: true,
                metadata: serde_json::Map::new(),
            });
            self.tasks.publish(task_id, update.clone());
            let _ = queue.send(update).await;
        }

        Ok(())
    }

    async fn fail(
        &self,
        task_id: &str,
        context_id: &str,
        queue: &EventQueue<StreamResult>,
        error: &str,
    ) {
        let message = WireMessage::agent_text(error);
        let result = self
            .tasks
            .update_status(task_id, TaskState::Failed, Some(message));
        if let Ok(task) = result {
            let update = StreamResult::StatusUpdate(crate::types::TaskStatusUpdateEvent {
                task_id: task_id.to_owned(),
                context_id: Some(context_id.to_owned()),
                status: task.status,
                final_: true,
                metadata: serde_json::Map::new(),
            });
            self.tasks.publish(task_id, update.clone());
            let _ = queue.send(update).await;
        }
    }
}
