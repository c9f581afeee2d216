//! The tool contract and runtimes.
//!
//! A [`Tool`] is a callable the model may invoke through a function-call
//! part. Plain tools implement `run`; long-running tools additionally
//! implement the streaming pattern in [`streaming`].

pub mod context;
pub mod function_tool;
pub mod streaming;

pub use context::ToolContext;
pub use function_tool::FunctionTool;
pub use streaming::{
    drain, ExecutionRegistry, ProgressSender, StreamingTool, ToolProgress, ToolResult, ToolStream,
};

use serde_json::{Map, Value};

use aw_domain::{FunctionDeclaration, LlmRequest, Result};

/// A callable exposed to the model.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Long-running tools complete out of band; the loop records their call
    /// ids on the event instead of waiting for a result.
    fn is_long_running(&self) -> bool {
        false
    }

    /// The declaration advertised to the model. `None` for tools that
    /// install themselves into the request via [`Tool::process_request`].
    fn declaration(&self) -> Option<FunctionDeclaration>;

    /// Execute one call.
    async fn run(&self, args: Map<String, Value>, ctx: &mut ToolContext) -> Result<Value>;

    /// Hook allowing a tool to rewrite the outgoing model request (e.g. to
    /// install model-side built-ins). Default: untouched.
    async fn process_request(&self, _request: &mut LlmRequest, _ctx: &ToolContext) -> Result<()> {
        Ok(())
    }
}
