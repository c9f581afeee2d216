//! The LLM agent — drives one user message to a completed turn by
//! interleaving model calls and tool calls, publishing events on the
//! invocation's channel.
//!
//! Entry point: [`LlmAgent::run`] spawns the loop and returns the event
//! stream. Termination: a final assistant turn, a loop-detector stop, a
//! callback/model error, max turns, or cancellation.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use aw_domain::{
    CancelToken, Content, Error, Event, FunctionDeclaration, GenerateConfig, LlmRequest,
    LlmResponse, Part, Role, Usage,
};
use aw_model::LanguageModel;
use aw_tools::{Tool, ToolContext};

use crate::callbacks::Callbacks;
use crate::context::InvocationContext;
use crate::loop_detector::LoopDetector;
use crate::{Agent, EventStream};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmAgent & builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentInner {
    name: String,
    description: String,
    model: Arc<dyn LanguageModel>,
    generate_config: GenerateConfig,
    tools: Vec<Arc<dyn Tool>>,
    callbacks: Callbacks,
    sub_agents: Vec<Arc<dyn Agent>>,
}

/// An agent backed by a language model and a set of tools.
#[derive(Clone)]
pub struct LlmAgent {
    inner: Arc<AgentInner>,
}

impl LlmAgent {
    pub fn builder(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> LlmAgentBuilder {
        LlmAgentBuilder {
            name: name.into(),
            description: String::new(),
            model,
            generate_config: GenerateConfig::default(),
            tools: Vec::new(),
            callbacks: Callbacks::default(),
            sub_agents: Vec::new(),
        }
    }
}

pub struct LlmAgentBuilder {
    name: String,
    description: String,
    model: Arc<dyn LanguageModel>,
    generate_config: GenerateConfig,
    tools: Vec<Arc<dyn Tool>>,
    callbacks: Callbacks,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl LlmAgentBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The system instruction sent with every model call.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.generate_config.system_instruction = Some(instruction.into());
        self
    }

    pub fn generate_config(mut self, config: GenerateConfig) -> Self {
        self.generate_config = config;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    pub fn build(self) -> LlmAgent {
        LlmAgent {
            inner: Arc::new(AgentInner {
                name: self.name,
                description: self.description,
                model: self.model,
                generate_config: self.generate_config,
                tools: self.tools,
                callbacks: self.callbacks,
                sub_agents: self.sub_agents,
            }),
        }
    }
}

#[async_trait::async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn description(&self) -> &str {
        &self.inner.description
    }

    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.inner.sub_agents.clone()
    }

    async fn run(&self, ctx: InvocationContext) -> aw_domain::Result<EventStream> {
        let (tx, rx) = mpsc::channel(ctx.run_config.queue_buffer.max(1));
        let runner = LoopRunner {
            inner: self.inner.clone(),
            ctx,
            tx,
        };
        tokio::spawn(async move { runner.run().await });
        Ok(rx)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LoopRunner — one invocation of the turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum ModelTurn {
    Content(Content, Option<Usage>),
    Cancelled,
}

enum ToolOutcome {
    Value(Value),
    Error { message: String, kind: &'static str },
    Cancelled,
}

/// Resolve only when the token trips. Used in `select!` arms so a cancel
/// interrupts a model stream or an in-flight tool at its next await point.
async fn cancelled(token: &CancelToken) {
    while !token.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct LoopRunner {
    inner: Arc<AgentInner>,
    ctx: InvocationContext,
    tx: mpsc::Sender<Event>,
}

impl LoopRunner {
    fn event(&self) -> Event {
        Event::new(&self.ctx.invocation_id, &self.inner.name)
            .with_branch(self.ctx.branch.clone())
    }

    /// Send an event downstream, appending non-partial events to the
    /// session first. Returns false when the consumer is gone.
    async fn publish(&self, event: Event) -> bool {
        if !event.partial {
            if let Some(sessions) = &self.ctx.services.session {
                if let Err(e) = sessions
                    .append_event(&self.ctx.session_key(), event.clone())
                    .await
                {
                    tracing::warn!(error = %e, "failed to append event to session");
                }
            }
        }
        self.tx.send(event).await.is_ok()
    }

    async fn publish_error(&self, code: &str, message: &str) {
        tracing::warn!(code, message, agent = %self.inner.name, "invocation failed");
        let event = self.event().with_error(code, message);
        let _ = self.publish(event).await;
    }

    async fn publish_terminal_text(&self, text: &str) {
        let event = self
            .event()
            .with_content(Content::model_text(text))
            .turn_complete(true);
        let _ = self.publish(event).await;
    }

    async fn publish_interrupted(&self) {
        let event = self.event().interrupted(true);
        let _ = self.publish(event).await;
    }

    fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.tools.iter().find(|t| t.name() == name).cloned()
    }

    fn tool_context(&self, call_id: &str, session_state: &Map<String, Value>) -> ToolContext {
        ToolContext::new(
            &self.ctx.invocation_id,
            call_id,
            &self.inner.name,
            self.ctx.session_key(),
            session_state.clone(),
            self.ctx.services.clone(),
        )
    }

    async fn run_after_agent(&self) {
        if let Some(hook) = &self.inner.callbacks.after_agent {
            match hook(&self.ctx) {
                Ok(Some(content)) => {
                    let event = self.event().with_content(content);
                    let _ = self.publish(event).await;
                }
                Ok(None) => {}
                Err(err) => {
                    self.publish_error("CALLBACK_ERROR", &err.to_string()).await;
                }
            }
        }
    }

    // ── Model call with retry/backoff ──────────────────────────────

    async fn model_turn(&self, request: &LlmRequest) -> aw_domain::Result<ModelTurn> {
        let attempts = self.ctx.run_config.retry_attempts;
        let mut backoff = Duration::from_millis(200);
        let mut last_err: Option<Error> = None;

        for attempt in 0..=attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(2));
            }

            let result = if self.ctx.run_config.streaming {
                self.stream_once(request).await
            } else {
                match self.inner.model.generate(request).await {
                    Ok(resp) => Ok(ModelTurn::Content(
                        resp.content
                            .unwrap_or_else(|| Content::new(Role::Model)),
                        resp.usage,
                    )),
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok(turn) => return Ok(turn),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        model = self.inner.model.model_id(),
                        "model call failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Model {
            code: "MODEL_ERROR".into(),
            message: "model call failed".into(),
        }))
    }

    /// One streaming model call: publish partial chunks, return the final
    /// accumulated content.
    async fn stream_once(&self, request: &LlmRequest) -> aw_domain::Result<ModelTurn> {
        let mut stream = self.inner.model.generate_stream(request).await?;
        let mut final_content: Option<Content> = None;
        let mut accumulated = String::new();
        let mut usage = None;

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let resp: LlmResponse = chunk?;
                    if let Some(u) = resp.usage {
                        usage = Some(u);
                    }
                    if resp.partial {
                        if let Some(content) = resp.content {
                            accumulated.push_str(&content.text());
                            let event = self.event().with_content(content).partial(true);
                            if !self.publish(event).await {
                                return Ok(ModelTurn::Cancelled);
                            }
                        }
                    } else if let Some(content) = resp.content {
                        final_content = Some(content);
                    }
                }
                _ = cancelled(&self.ctx.cancel) => return Ok(ModelTurn::Cancelled),
            }
        }

        let content = final_content.unwrap_or_else(|| Content::model_text(accumulated));
        Ok(ModelTurn::Content(content, usage))
    }

    // ── Tool execution with timeout and idempotent retry ───────────

    async fn execute_tool(
        &self,
        tool: &Arc<dyn Tool>,
        args: &Map<String, Value>,
        tctx: &mut ToolContext,
        timeout: Duration,
    ) -> ToolOutcome {
        let idempotent = tool.declaration().map(|d| d.idempotent).unwrap_or(false);
        let attempts = if idempotent {
            self.ctx.run_config.retry_attempts
        } else {
            0
        };

        let mut last = ToolOutcome::Error {
            message: "tool did not run".into(),
            kind: "tool_error",
        };
        for attempt in 0..=attempts {
            if attempt > 0 {
                tracing::debug!(tool = tool.name(), attempt, "retrying idempotent tool");
            }
            tokio::select! {
                res = tokio::time::timeout(timeout, tool.run(args.clone(), &mut *tctx)) => {
                    match res {
                        Ok(Ok(value)) => return ToolOutcome::Value(value),
                        Ok(Err(Error::InvalidArguments(message))) => {
                            // Model-supplied arguments were bad; retrying the
                            // same arguments cannot help.
                            return ToolOutcome::Error { message, kind: "invalid_arguments" };
                        }
                        Ok(Err(e)) => {
                            last = ToolOutcome::Error { message: e.to_string(), kind: "tool_error" };
                        }
                        Err(_) => {
                            last = ToolOutcome::Error {
                                message: format!("timeout after {}s", timeout.as_secs()),
                                kind: "timeout",
                            };
                        }
                    }
                }
                _ = cancelled(&self.ctx.cancel) => return ToolOutcome::Cancelled,
            }
        }
        last
    }

    // ── The turn loop ──────────────────────────────────────────────

    async fn run(self) {
        // Before-agent hook.
        if let Some(hook) = &self.inner.callbacks.before_agent {
            match hook(&self.ctx) {
                Ok(Some(content)) => {
                    let event = self.event().with_content(content);
                    if !self.publish(event).await {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.publish_error("CALLBACK_ERROR", &err.to_string()).await;
                    return;
                }
            }
        }

        // History from the session snapshot plus the current user content.
        let mut contents: Vec<Content> = self
            .ctx
            .session
            .events
            .iter()
            .filter(|e| !e.partial)
            .filter_map(|e| e.content.clone())
            .collect();
        if let Some(user) = &self.ctx.user_content {
            contents.push(user.clone());
            if let Some(sessions) = &self.ctx.services.session {
                let event = Event::new(&self.ctx.invocation_id, "user")
                    .with_content(user.clone())
                    .with_branch(self.ctx.branch.clone());
                if let Err(e) = sessions.append_event(&self.ctx.session_key(), event).await {
                    tracing::warn!(error = %e, "failed to append user event");
                }
            }
        }

        let mut session_state = self.ctx.session.state.clone();
        let mut detector = LoopDetector::new(self.ctx.run_config.clamped_loop_window());
        let mut total_usage = Usage::default();
        let timeout = self.ctx.run_config.tool_call_timeout();
        let max_turns = self.ctx.run_config.max_turns.max(1);
        let declared: Vec<FunctionDeclaration> = self
            .inner
            .tools
            .iter()
            .filter_map(|t| t.declaration())
            .collect();

        for turn in 0..max_turns {
            if self.ctx.cancel.is_cancelled() || self.ctx.is_ended() {
                self.publish_interrupted().await;
                return;
            }
            tracing::debug!(turn, agent = %self.inner.name, "turn started");

            // Build the request and let tools rewrite it.
            let mut request = LlmRequest {
                contents: contents.clone(),
                config: self.inner.generate_config.clone(),
                tools: declared.clone(),
            };
            let hook_ctx = self.tool_context("", &session_state);
            for tool in &self.inner.tools {
                if let Err(err) = tool.process_request(&mut request, &hook_ctx).await {
                    self.publish_error("TOOL_ERROR", &err.to_string()).await;
                    return;
                }
            }

            if let Some(hook) = &self.inner.callbacks.before_model {
                if let Err(err) = hook(&self.ctx, &mut request) {
                    self.publish_error("CALLBACK_ERROR", &err.to_string()).await;
                    return;
                }
            }

            let turn_outcome = match self.model_turn(&request).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.publish_error("MODEL_ERROR", &err.to_string()).await;
                    return;
                }
            };
            let (mut content, usage) = match turn_outcome {
                ModelTurn::Cancelled => {
                    self.publish_interrupted().await;
                    return;
                }
                ModelTurn::Content(content, usage) => (content, usage),
            };

            if let Some(hook) = &self.inner.callbacks.after_model {
                let mut resp = LlmResponse {
                    content: Some(content),
                    usage,
                    ..Default::default()
                };
                if let Err(err) = hook(&self.ctx, &mut resp) {
                    self.publish_error("CALLBACK_ERROR", &err.to_string()).await;
                    return;
                }
                content = resp
                    .content
                    .unwrap_or_else(|| Content::new(Role::Model));
            }
            if let Some(u) = usage {
                total_usage.add(&u);
            }

            let calls = content.function_calls();

            // No calls: final answer, close out the turn.
            if calls.is_empty() {
                let event = self.event().with_content(content).turn_complete(true);
                if !self.publish(event).await {
                    return;
                }
                self.run_after_agent().await;
                tracing::debug!(
                    total_tokens = total_usage.total_tokens,
                    "invocation complete"
                );
                return;
            }

            // Assistant event carrying the calls.
            let long_ids: Vec<String> = calls
                .iter()
                .filter_map(|p| match p {
                    Part::FunctionCall { id, name, .. } => self
                        .find_tool(name)
                        .filter(|t| t.is_long_running())
                        .map(|_| id.clone()),
                    _ => None,
                })
                .collect();
            let mut event = self.event().with_content(content.clone());
            event.long_running_tool_ids = long_ids;
            if !self.publish(event).await {
                return;
            }
            contents.push(content);

            // Runaway-loop checks: the pending calls count against the
            // budget before any of them runs.
            for part in &calls {
                if let Part::FunctionCall { name, args, .. } = part {
                    detector.record(name, args);
                }
            }
            if detector.check_tool_call_limit(self.ctx.run_config.max_tool_calls) {
                self.publish_terminal_text("Reached maximum number of tool calls")
                    .await;
                return;
            }
            if detector.check_repeating_pattern() {
                self.publish_terminal_text("Completed the tool execution")
                    .await;
                return;
            }

            // Execute the calls in order.
            for part in calls {
                let Part::FunctionCall {
                    id: call_id,
                    name,
                    args,
                    ..
                } = part
                else {
                    continue;
                };

                if self.ctx.cancel.is_cancelled() {
                    self.publish_interrupted().await;
                    return;
                }

                let Some(tool) = self.find_tool(&name) else {
                    let mut response = Map::new();
                    response.insert("error".into(), json!(format!("tool '{name}' not found")));
                    let content = Content {
                        role: Role::User,
                        parts: vec![Part::function_response(&call_id, &name, response)],
                    };
                    let event = self.event().with_content(content.clone());
                    if !self.publish(event).await {
                        return;
                    }
                    contents.push(content);
                    continue;
                };

                let mut args = args;
                if let Some(hook) = &self.inner.callbacks.before_tool {
                    if let Err(err) = hook(&self.ctx, &name, &mut args) {
                        self.publish_error("CALLBACK_ERROR", &err.to_string()).await;
                        return;
                    }
                }

                let mut tctx = self.tool_context(&call_id, &session_state);
                let outcome = self.execute_tool(&tool, &args, &mut tctx, timeout).await;

                let mut response = Map::new();
                match outcome {
                    ToolOutcome::Cancelled => {
                        self.publish_interrupted().await;
                        return;
                    }
                    ToolOutcome::Value(value) => {
                        response.insert("result".into(), value);
                    }
                    ToolOutcome::Error { message, kind } => {
                        tracing::warn!(tool = %name, kind, error = %message, "tool failed");
                        response.insert("error".into(), json!(message));
                        if kind != "tool_error" {
                            response.insert("error_type".into(), json!(kind));
                        }
                    }
                }

                if let Some(hook) = &self.inner.callbacks.after_tool {
                    let mut value = Value::Object(response);
                    if let Err(err) = hook(&self.ctx, &name, &mut value) {
                        self.publish_error("CALLBACK_ERROR", &err.to_string()).await;
                        return;
                    }
                    response = value.as_object().cloned().unwrap_or_default();
                }

                let actions = tctx.into_actions();
                let state_delta = actions.state_delta.clone();
                let escalate = actions.escalate;
                let transfer = actions.transfer_to_agent.clone();

                let content = Content {
                    role: Role::User,
                    parts: vec![Part::function_response(&call_id, &name, response)],
                };
                let event = self
                    .event()
                    .with_content(content.clone())
                    .with_actions(actions);
                if !self.publish(event).await {
                    return;
                }

                // Delta applied before the next event is constructed.
                session_state.extend(state_delta);
                contents.push(content);

                if escalate {
                    tracing::info!(agent = %self.inner.name, "tool escalated; ending invocation");
                    let event = self.event().turn_complete(true);
                    let _ = self.publish(event).await;
                    return;
                }
                if let Some(target) = transfer {
                    tracing::info!(target = %target, "transfer requested; ending invocation");
                    let event = self.event().turn_complete(true);
                    let _ = self.publish(event).await;
                    return;
                }
            }
        }

        self.publish_terminal_text("Max turns reached").await;
    }
}
