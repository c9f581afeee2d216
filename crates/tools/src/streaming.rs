//! Streaming-tool runtime — long-running work with progress, a bounded
//! per-tool concurrency limit, and per-execution cancellation.
//!
//! Each running execution is tracked in the tool's [`ExecutionRegistry`].
//! Starting past `max_concurrency` fails fast; cancelling flips the
//! execution's token, freezes its last progress as non-cancelable, and the
//! worker winds down to a `context canceled` result. Progress and result
//! channels close exactly once, when the worker finishes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use aw_domain::{CancelToken, Error, Result};

use crate::context::ToolContext;
use crate::Tool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress & result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One progress report from a running execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolProgress {
    pub id: String,
    /// Completion fraction in `[0, 1]`.
    pub fraction: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub cancelable: bool,
}

/// The terminal outcome of an execution.
#[derive(Debug)]
pub struct ToolResult {
    pub id: String,
    pub result: std::result::Result<Value, String>,
    pub done: bool,
}

/// The stream handle returned by `run_stream`.
#[derive(Debug)]
pub struct ToolStream {
    pub execution_id: String,
    pub progress: mpsc::Receiver<ToolProgress>,
    pub result: oneshot::Receiver<ToolResult>,
    pub cancel: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ExecutionRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ActiveExecution {
    cancel: CancelToken,
    last_progress: ToolProgress,
}

/// Per-tool-instance registry of active executions.
pub struct ExecutionRegistry {
    tool_name: String,
    max_concurrency: usize,
    active: RwLock<HashMap<String, ActiveExecution>>,
}

impl ExecutionRegistry {
    pub fn new(tool_name: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            tool_name: tool_name.into(),
            max_concurrency: max_concurrency.max(1),
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Register a new execution; fails once the concurrency limit is hit.
    fn begin(&self, id: &str) -> Result<CancelToken> {
        let mut active = self.active.write();
        if active.len() >= self.max_concurrency {
            return Err(Error::TooManyActiveTasks(self.tool_name.clone()));
        }
        let cancel = CancelToken::new();
        active.insert(
            id.to_owned(),
            ActiveExecution {
                cancel: cancel.clone(),
                last_progress: ToolProgress {
                    id: id.to_owned(),
                    fraction: 0.0,
                    message: "started".into(),
                    metadata: Map::new(),
                    timestamp: Utc::now(),
                    cancelable: true,
                },
            },
        );
        Ok(cancel)
    }

    fn finish(&self, id: &str) {
        self.active.write().remove(id);
    }

    fn record_progress(&self, progress: &ToolProgress) {
        if let Some(entry) = self.active.write().get_mut(&progress.id) {
            entry.last_progress = progress.clone();
        }
    }

    /// Cancel a running execution. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        let mut active = self.active.write();
        match active.get_mut(id) {
            Some(entry) => {
                entry.cancel.cancel();
                entry.last_progress.cancelable = false;
                entry.last_progress.timestamp = Utc::now();
                tracing::debug!(tool = %self.tool_name, execution_id = id, "execution cancelled");
                true
            }
            None => false,
        }
    }

    /// Latest progress snapshot of a running execution.
    pub fn status(&self, id: &str) -> Option<ToolProgress> {
        self.active.read().get(id).map(|e| e.last_progress.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spawning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle a worker uses to report progress.
pub struct ProgressSender {
    id: String,
    tx: mpsc::Sender<ToolProgress>,
    registry: Arc<ExecutionRegistry>,
}

impl ProgressSender {
    pub async fn report(&self, fraction: f64, message: impl Into<String>) {
        self.report_with(fraction, message, Map::new()).await;
    }

    pub async fn report_with(
        &self,
        fraction: f64,
        message: impl Into<String>,
        metadata: Map<String, Value>,
    ) {
        let progress = ToolProgress {
            id: self.id.clone(),
            fraction: fraction.clamp(0.0, 1.0),
            message: message.into(),
            metadata,
            timestamp: Utc::now(),
            cancelable: true,
        };
        self.registry.record_progress(&progress);
        // A closed receiver only means the consumer stopped listening.
        let _ = self.tx.send(progress).await;
    }
}

/// Start a worker under the registry: registers the execution, wires the
/// progress and result channels, and removes the entry when the worker
/// finishes. A cancelled worker resolves to a `context canceled` result.
pub fn spawn_execution<F, Fut>(registry: Arc<ExecutionRegistry>, work: F) -> Result<ToolStream>
where
    F: FnOnce(ProgressSender, CancelToken) -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<Value, String>> + Send + 'static,
{
    let id = uuid::Uuid::new_v4().to_string();
    let cancel = registry.begin(&id)?;

    let (progress_tx, progress_rx) = mpsc::channel(16);
    let (result_tx, result_rx) = oneshot::channel();

    let sender = ProgressSender {
        id: id.clone(),
        tx: progress_tx,
        registry: registry.clone(),
    };

    let worker_cancel = cancel.clone();
    let worker_id = id.clone();
    tokio::spawn(async move {
        let outcome = work(sender, worker_cancel.clone()).await;
        let result = if worker_cancel.is_cancelled() {
            Err("context canceled".to_string())
        } else {
            outcome
        };
        let _ = result_tx.send(ToolResult {
            id: worker_id.clone(),
            result,
            done: true,
        });
        registry.finish(&worker_id);
    });

    Ok(ToolStream {
        execution_id: id,
        progress: progress_rx,
        result: result_rx,
        cancel,
    })
}

/// Drain a stream to its terminal result: discard progress, await the
/// result, surface the first error. This is how `run` is implemented for
/// streaming tools, so the two entry points cannot drift.
pub async fn drain(mut stream: ToolStream) -> Result<Value> {
    while stream.progress.recv().await.is_some() {}
    let tool_result = stream
        .result
        .await
        .map_err(|_| Error::Other("tool worker dropped without a result".into()))?;
    tool_result.result.map_err(|message| Error::Tool {
        tool: tool_result.id,
        message,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StreamingTool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool whose work streams progress and supports cancellation.
#[async_trait::async_trait]
pub trait StreamingTool: Tool {
    fn registry(&self) -> &Arc<ExecutionRegistry>;

    /// Start an execution and hand back its stream.
    async fn run_stream(
        &self,
        args: Map<String, Value>,
        ctx: &mut ToolContext,
    ) -> Result<ToolStream>;

    fn can_cancel(&self) -> bool {
        true
    }

    fn cancel(&self, execution_id: &str) -> bool {
        self.registry().cancel(execution_id)
    }

    fn status(&self, execution_id: &str) -> Option<ToolProgress> {
        self.registry().status(execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn registry(max: usize) -> Arc<ExecutionRegistry> {
        Arc::new(ExecutionRegistry::new("ticker", max))
    }

    #[tokio::test]
    async fn progress_then_result() {
        let reg = registry(2);
        let stream = spawn_execution(reg.clone(), |progress, _cancel| async move {
            progress.report(0.5, "halfway").await;
            progress.report(1.0, "done").await;
            Ok(json!("finished"))
        })
        .unwrap();

        let value = drain(stream).await.unwrap();
        assert_eq!(value, json!("finished"));
        // Registry entry removed once the worker finishes.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reg.active_count(), 0);
    }

    #[tokio::test]
    async fn third_start_exceeds_concurrency_of_two() {
        let reg = registry(2);
        let slow = |_p: ProgressSender, cancel: CancelToken| async move {
            while !cancel.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(json!(null))
        };

        let a = spawn_execution(reg.clone(), slow).unwrap();
        let b = spawn_execution(reg.clone(), slow).unwrap();
        let err = spawn_execution(reg.clone(), slow).unwrap_err();
        assert!(matches!(err, Error::TooManyActiveTasks(_)));

        a.cancel.cancel();
        b.cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_yields_context_canceled() {
        let reg = registry(1);
        let mut stream = spawn_execution(reg.clone(), |progress, cancel| async move {
            for step in 0..50 {
                if cancel.is_cancelled() {
                    return Ok(json!("unreachable"));
                }
                progress.report(step as f64 / 50.0, "ticking").await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(json!("completed"))
        })
        .unwrap();

        // Wait for the first progress, then cancel via the registry.
        let first = stream.progress.recv().await.unwrap();
        assert!(first.cancelable);
        assert!(reg.cancel(&stream.execution_id));

        let result = stream.result.await.unwrap();
        assert_eq!(result.result.unwrap_err(), "context canceled");
        assert!(result.done);
    }

    #[tokio::test]
    async fn cancelled_status_is_not_cancelable() {
        let reg = registry(1);
        let stream = spawn_execution(reg.clone(), |_p, cancel: CancelToken| async move {
            while !cancel.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(json!(null))
        })
        .unwrap();

        reg.cancel(&stream.execution_id);
        let status = reg.status(&stream.execution_id);
        if let Some(progress) = status {
            assert!(!progress.cancelable);
        }
    }

    #[tokio::test]
    async fn worker_error_surfaces_through_drain() {
        let reg = registry(1);
        let stream = spawn_execution(reg, |_p, _c| async move {
            Err("disk on fire".to_string())
        })
        .unwrap();
        let err = drain(stream).await.unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn cancel_unknown_execution_returns_false() {
        let reg = registry(1);
        assert!(!reg.cancel("ghost"));
        assert!(reg.status("ghost").is_none());
    }
}
