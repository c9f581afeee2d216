//! Sequential composition — runs an ordered list of sub-agents for a fixed
//! number of rounds (pipelines, debates).
//!
//! Children share the parent's session and cancel token. Child events are
//! forwarded downstream with their `turn_complete` flag cleared so the
//! composite's own closing event is the single terminal marker; after the
//! last round the composite emits a `turn_complete` event carrying the last
//! child's final content.

use std::sync::Arc;

use tokio::sync::mpsc;

use aw_domain::{Content, Event, Result, Role};

use crate::context::InvocationContext;
use crate::{Agent, EventStream};

struct SeqInner {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
    max_rounds: usize,
    stop_on_error: bool,
    pass_complete_history: bool,
    add_turn_markers: bool,
}

/// Runs its sub-agents in order, `max_rounds` times.
#[derive(Clone)]
pub struct SequentialAgent {
    inner: Arc<SeqInner>,
}

impl SequentialAgent {
    pub fn builder(name: impl Into<String>) -> SequentialAgentBuilder {
        SequentialAgentBuilder {
            name: name.into(),
            description: String::new(),
            sub_agents: Vec::new(),
            max_rounds: 1,
            stop_on_error: true,
            pass_complete_history: true,
            add_turn_markers: false,
        }
    }
}

pub struct SequentialAgentBuilder {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
    max_rounds: usize,
    stop_on_error: bool,
    pass_complete_history: bool,
    add_turn_markers: bool,
}

impl SequentialAgentBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Pass the full aggregated history to each child (vs. only the prior
    /// child's final answer).
    pub fn pass_complete_history(mut self, pass: bool) -> Self {
        self.pass_complete_history = pass;
        self
    }

    /// Prepend a system-role marker naming the speaker to each child turn.
    pub fn add_turn_markers(mut self, add: bool) -> Self {
        self.add_turn_markers = add;
        self
    }

    pub fn build(self) -> SequentialAgent {
        SequentialAgent {
            inner: Arc::new(SeqInner {
                name: self.name,
                description: self.description,
                sub_agents: self.sub_agents,
                max_rounds: self.max_rounds,
                stop_on_error: self.stop_on_error,
                pass_complete_history: self.pass_complete_history,
                add_turn_markers: self.add_turn_markers,
            }),
        }
    }
}

#[async_trait::async_trait]
impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn description(&self) -> &str {
        &self.inner.description
    }

    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.inner.sub_agents.clone()
    }

    async fn run(&self, ctx: InvocationContext) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(ctx.run_config.queue_buffer.max(1));
        let inner = self.inner.clone();
        tokio::spawn(async move { run_rounds(inner, ctx, tx).await });
        Ok(rx)
    }
}

async fn run_rounds(inner: Arc<SeqInner>, ctx: InvocationContext, tx: mpsc::Sender<Event>) {
    let base_user = ctx.user_content.clone();
    let mut last_final: Option<Content> = None;
    let mut first_child = true;

    'rounds: for round in 0..inner.max_rounds {
        for child in &inner.sub_agents {
            // Never start another child after cancellation.
            if ctx.cancel.is_cancelled() {
                let event = Event::new(&ctx.invocation_id, &inner.name).interrupted(true);
                let _ = tx.send(event).await;
                return;
            }
            tracing::debug!(round, child = child.name(), "running sub-agent");

            let mut child_ctx = ctx.child(child.name());
            if inner.pass_complete_history {
                // Refresh the snapshot so the child sees events appended by
                // earlier children in this invocation.
                if let Some(sessions) = &ctx.services.session {
                    if let Ok(fresh) = sessions.get_session(&ctx.session_key()).await {
                        child_ctx.session = fresh;
                    }
                }
                child_ctx.user_content = if first_child { base_user.clone() } else { None };
            } else {
                child_ctx.session.events.clear();
                child_ctx.user_content = match &last_final {
                    Some(content) if !first_child => Some(Content {
                        role: Role::User,
                        parts: content.parts.clone(),
                    }),
                    _ => base_user.clone(),
                };
            }
            if inner.add_turn_markers {
                let marker = Event::new(&ctx.invocation_id, "system")
                    .with_content(Content::system_text(format!("[{}]", child.name())));
                child_ctx.session.events.push(marker);
            }
            first_child = false;

            let mut stream = match child.run(child_ctx).await {
                Ok(stream) => stream,
                Err(err) => {
                    let event = Event::new(&ctx.invocation_id, child.name())
                        .with_error("AGENT_ERROR", err.to_string());
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    if inner.stop_on_error {
                        return;
                    }
                    continue;
                }
            };

            let mut child_failed = false;
            while let Some(mut event) = stream.recv().await {
                if event.error_code.is_some() {
                    child_failed = true;
                }
                if !event.partial && event.is_final_response() {
                    if let Some(content) = &event.content {
                        if !content.text().is_empty() {
                            last_final = Some(content.clone());
                        }
                    }
                }
                event.turn_complete = false;
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            if child_failed && inner.stop_on_error {
                return;
            }
            if ctx.cancel.is_cancelled() {
                break 'rounds;
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        let event = Event::new(&ctx.invocation_id, &inner.name).interrupted(true);
        let _ = tx.send(event).await;
        return;
    }

    let mut event = Event::new(&ctx.invocation_id, &inner.name).turn_complete(true);
    if let Some(content) = last_final {
        event = event.with_content(content);
    }
    let _ = tx.send(event).await;
}
