//! Function-backed tools — the standard way to register a plain tool.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use aw_domain::{FunctionDeclaration, Result};

use crate::context::ToolContext;
use crate::Tool;

type Handler = Arc<
    dyn for<'a> Fn(
            Map<String, Value>,
            &'a mut ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>
        + Send
        + Sync,
>;

/// A tool backed by an async closure plus a declaration.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    idempotent: bool,
    long_running: bool,
    handler: Handler,
    calls: AtomicUsize,
}

impl FunctionTool {
    /// Build from a closure that only needs the arguments.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::with_context(
            name,
            description,
            parameters,
            move |args, _ctx: &mut ToolContext| {
                let f = f.clone();
                Box::pin(async move { f(args).await })
            },
        )
    }

    /// Build from a closure that also receives the tool context.
    pub fn with_context<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: for<'a> Fn(
                Map<String, Value>,
                &'a mut ToolContext,
            ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            idempotent: false,
            long_running: false,
            handler: Arc::new(f),
            calls: AtomicUsize::new(0),
        }
    }

    /// Mark the tool safe to retry on timeout or failure.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Mark the tool as long-running (completes out of band).
    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    /// How many times this tool has run.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_long_running(&self) -> bool {
        self.long_running
    }

    fn declaration(&self) -> Option<FunctionDeclaration> {
        Some(FunctionDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            idempotent: self.idempotent,
        })
    }

    async fn run(&self, args: Map<String, Value>, ctx: &mut ToolContext) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.handler)(args, ctx).await
    }
}
