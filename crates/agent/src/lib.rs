//! Agents — entities that consume a user message and produce an ordered
//! stream of events.
//!
//! [`LlmAgent`] drives the model↔tool loop; [`SequentialAgent`] composes
//! sub-agents into fixed-round pipelines. Remote agents live in the wire
//! crate, next to the client they delegate through.

pub mod callbacks;
pub mod context;
pub mod llm_agent;
pub mod loop_detector;
pub mod sequential;

pub use callbacks::Callbacks;
pub use context::InvocationContext;
pub use llm_agent::LlmAgent;
pub use loop_detector::LoopDetector;
pub use sequential::SequentialAgent;

use std::sync::Arc;

use aw_domain::{Event, Result};

/// The receiver half of an invocation's event channel. Finite and not
/// restartable; the producer closes it on completion.
pub type EventStream = tokio::sync::mpsc::Receiver<Event>;

/// An entity that turns one user message into a stream of events.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Direct children, used for name lookup and composition. Ownership
    /// only flows downward; parents are never traversed.
    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        Vec::new()
    }

    /// Run one invocation. Events arrive on the returned stream until the
    /// producer closes it.
    async fn run(&self, ctx: InvocationContext) -> Result<EventStream>;
}

/// Look up an agent by name in `root`'s subtree (breadth-first, sub-agent
/// direction only).
pub fn find_agent(root: &Arc<dyn Agent>, name: &str) -> Option<Arc<dyn Agent>> {
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(root.clone());
    while let Some(agent) = queue.pop_front() {
        if agent.name() == name {
            return Some(agent);
        }
        for child in agent.sub_agents() {
            queue.push_back(child);
        }
    }
    None
}

/// Drain a stream and return the text of the final response event, plus all
/// events seen. Used by non-streaming callers.
pub async fn collect_final_text(mut stream: EventStream) -> (String, Vec<Event>) {
    let mut events = Vec::new();
    let mut final_text = String::new();
    while let Some(event) = stream.recv().await {
        if !event.partial {
            if let Some(content) = &event.content {
                if event.is_final_response() {
                    let text = content.text();
                    if !text.is_empty() {
                        final_text = text;
                    }
                }
            }
        }
        events.push(event);
    }
    (final_text, events)
}
