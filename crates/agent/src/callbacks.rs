//! Before/after hooks around the agent, the model, and each tool call.
//!
//! A fixed set of optional functions rather than anything dynamic: model
//! hooks see the outgoing request / incoming response, tool hooks wrap one
//! call each. Any hook error turns into a terminal `CALLBACK_ERROR` event.

use serde_json::{Map, Value};

use aw_domain::{Content, LlmRequest, LlmResponse, Result};

use crate::context::InvocationContext;

pub type AgentHook = Box<dyn Fn(&InvocationContext) -> Result<Option<Content>> + Send + Sync>;
pub type BeforeModelHook =
    Box<dyn Fn(&InvocationContext, &mut LlmRequest) -> Result<()> + Send + Sync>;
pub type AfterModelHook =
    Box<dyn Fn(&InvocationContext, &mut LlmResponse) -> Result<()> + Send + Sync>;
pub type BeforeToolHook =
    Box<dyn Fn(&InvocationContext, &str, &mut Map<String, Value>) -> Result<()> + Send + Sync>;
pub type AfterToolHook =
    Box<dyn Fn(&InvocationContext, &str, &mut Value) -> Result<()> + Send + Sync>;

/// The six optional hooks. A `before_agent`/`after_agent` hook may return
/// content, published as an extra event around the run.
#[derive(Default)]
pub struct Callbacks {
    pub before_agent: Option<AgentHook>,
    pub after_agent: Option<AgentHook>,
    pub before_model: Option<BeforeModelHook>,
    pub after_model: Option<AfterModelHook>,
    pub before_tool: Option<BeforeToolHook>,
    pub after_tool: Option<AfterToolHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_agent(
        mut self,
        f: impl Fn(&InvocationContext) -> Result<Option<Content>> + Send + Sync + 'static,
    ) -> Self {
        self.before_agent = Some(Box::new(f));
        self
    }

    pub fn on_after_agent(
        mut self,
        f: impl Fn(&InvocationContext) -> Result<Option<Content>> + Send + Sync + 'static,
    ) -> Self {
        self.after_agent = Some(Box::new(f));
        self
    }

    pub fn on_before_model(
        mut self,
        f: impl Fn(&InvocationContext, &mut LlmRequest) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_model = Some(Box::new(f));
        self
    }

    pub fn on_after_model(
        mut self,
        f: impl Fn(&InvocationContext, &mut LlmResponse) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_model = Some(Box::new(f));
        self
    }

    pub fn on_before_tool(
        mut self,
        f: impl Fn(&InvocationContext, &str, &mut Map<String, Value>) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.before_tool = Some(Box::new(f));
        self
    }

    pub fn on_after_tool(
        mut self,
        f: impl Fn(&InvocationContext, &str, &mut Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_tool = Some(Box::new(f));
        self
    }
}
