//! The task registry — wire-visible task state, the status state machine,
//! per-task cancellation tokens, and push-notification configs.
//!
//! Reads share the lock; add/remove/update take it exclusively. Status
//! timestamps never move backwards and terminal tasks are frozen.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use aw_domain::CancelToken;

use crate::error::A2aError;
use crate::types::{
    PushNotificationConfig, StreamResult, Task, TaskState, TaskStatus, WireArtifact, WireMessage,
};

/// Buffer of the per-task event bus used by late subscribers.
const BUS_CAPACITY: usize = 64;

struct TaskEntry {
    task: Task,
    cancel: CancelToken,
    bus: broadcast::Sender<StreamResult>,
}

/// Registry of all tasks owned by the protocol server.
#[derive(Default)]
pub struct TaskManager {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    push_configs: RwLock<HashMap<String, PushNotificationConfig>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task in `submitted` with a fresh cancel token. Returns the
    /// existing snapshot when the id is already registered.
    pub fn create(&self, task_id: &str, context_id: Option<String>) -> Task {
        let mut tasks = self.tasks.write();
        if let Some(entry) = tasks.get(task_id) {
            return entry.task.clone();
        }
        let task = Task {
            id: task_id.to_owned(),
            context_id,
            status: TaskStatus::new(TaskState::Submitted),
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: serde_json::Map::new(),
        };
        tracing::info!(task_id, "task submitted");
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        tasks.insert(
            task_id.to_owned(),
            TaskEntry {
                task: task.clone(),
                cancel: CancelToken::new(),
                bus,
            },
        );
        task
    }

    /// Subscribe to the task's live event bus (used by `tasks/resubscribe`).
    pub fn subscribe(&self, task_id: &str) -> Option<broadcast::Receiver<StreamResult>> {
        self.tasks.read().get(task_id).map(|e| e.bus.subscribe())
    }

    /// Publish a wire event to any live subscribers. Dropped silently when
    /// nobody is listening.
    pub fn publish(&self, task_id: &str, event: StreamResult) {
        if let Some(entry) = self.tasks.read().get(task_id) {
            let _ = entry.bus.send(event);
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().get(task_id).map(|e| e.task.clone())
    }

    pub fn cancel_token(&self, task_id: &str) -> Option<CancelToken> {
        self.tasks.read().get(task_id).map(|e| e.cancel.clone())
    }

    /// Apply a status transition. Illegal moves out of a terminal state are
    /// ignored with a warning — the first terminal status wins.
    pub fn update_status(
        &self,
        task_id: &str,
        state: TaskState,
        message: Option<WireMessage>,
    ) -> Result<Task, A2aError> {
        let mut tasks = self.tasks.write();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| A2aError::TaskNotFound(task_id.to_owned()))?;

        let current = entry.task.status.state;
        if !current.can_transition(state) {
            tracing::warn!(
                task_id,
                from = %current,
                to = %state,
                "ignoring illegal status transition"
            );
            return Ok(entry.task.clone());
        }

        let previous = entry.task.status.timestamp;
        let mut timestamp = Utc::now();
        if let Some(previous) = previous {
            timestamp = timestamp.max(previous);
        }
        if let Some(msg) = &message {
            entry.task.history.push(msg.clone());
        }
        entry.task.status = TaskStatus {
            state,
            message,
            timestamp: Some(timestamp),
        };
        Ok(entry.task.clone())
    }

    pub fn add_history(&self, task_id: &str, message: WireMessage) {
        if let Some(entry) = self.tasks.write().get_mut(task_id) {
            entry.task.history.push(message);
        }
    }

    pub fn add_artifact(&self, task_id: &str, artifact: WireArtifact) {
        if let Some(entry) = self.tasks.write().get_mut(task_id) {
            entry.task.artifacts.push(artifact);
        }
    }

    /// Cancel a task: flips its token and moves it to `canceled`.
    pub fn cancel(&self, task_id: &str) -> Result<Task, A2aError> {
        let mut tasks = self.tasks.write();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| A2aError::TaskNotFound(task_id.to_owned()))?;

        if entry.task.status.state.is_terminal() {
            return Err(A2aError::TaskNotCancelable(format!(
                "task {task_id} is {}",
                entry.task.status.state
            )));
        }

        entry.cancel.cancel();
        let previous = entry.task.status.timestamp;
        let mut timestamp = Utc::now();
        if let Some(previous) = previous {
            timestamp = timestamp.max(previous);
        }
        entry.task.status = TaskStatus {
            state: TaskState::Canceled,
            message: None,
            timestamp: Some(timestamp),
        };
        tracing::info!(task_id, "task canceled");
        Ok(entry.task.clone())
    }

    // ── Push-notification configuration surface ────────────────────

    pub fn set_push_config(
        &self,
        config: crate::types::TaskPushNotificationConfig,
    ) -> Result<crate::types::TaskPushNotificationConfig, A2aError> {
        if self.get(&config.task_id).is_none() {
            return Err(A2aError::TaskNotFound(config.task_id.clone()));
        }
        self.push_configs
            .write()
            .insert(config.task_id.clone(), config.push_notification_config.clone());
        Ok(config)
    }

    pub fn get_push_config(
        &self,
        task_id: &str,
    ) -> Result<crate::types::TaskPushNotificationConfig, A2aError> {
        if self.get(task_id).is_none() {
            return Err(A2aError::TaskNotFound(task_id.to_owned()));
        }
        let config = self
            .push_configs
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| A2aError::TaskNotFound(format!("no push config for {task_id}")))?;
        Ok(crate::types::TaskPushNotificationConfig {
            task_id: task_id.to_owned(),
            push_notification_config: config,
        })
    }
}
