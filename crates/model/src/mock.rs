//! Deterministic scripted backend for tests.
//!
//! Each `generate` call pops the next script entry, so tests can specify
//! exact turn sequences (tool calls included) without network access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use aw_domain::{
    BoxStream, Content, Error, LlmRequest, LlmResponse, Part, Result, Role, Usage,
};

use crate::LanguageModel;

enum Script {
    Respond(LlmResponse),
    Fail { code: String, message: String },
}

/// A pre-scripted model. When the script queue runs dry the last entry is
/// replayed, which lets tests model a backend that loops forever.
pub struct MockModel {
    scripts: Mutex<VecDeque<Script>>,
    last: Mutex<Option<LlmResponse>>,
    calls: AtomicUsize,
    /// The last request seen, for assertions on what the loop sent.
    pub last_request: Arc<Mutex<Option<LlmRequest>>>,
}

impl MockModel {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            scripts: Mutex::new(responses.into_iter().map(Script::Respond).collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// A model that replies with a single text message.
    pub fn text_reply(text: impl Into<String>) -> Self {
        Self::new(vec![LlmResponse::from_content(Content::model_text(text))])
    }

    /// Turn 1: a function call. Turn 2: a text reply.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Map<String, Value>,
        final_text: impl Into<String>,
    ) -> Self {
        let call = Content::new(Role::Model).with_part(Part::function_call(
            call_id,
            tool_name,
            args,
        ));
        Self::new(vec![
            LlmResponse::from_content(call),
            LlmResponse::from_content(Content::model_text(final_text)),
        ])
    }

    /// A model that emits the same function call on every turn.
    pub fn always_tool_call(
        tool_name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        let name = tool_name.into();
        let call = Content::new(Role::Model).with_part(Part::function_call(
            "loop-call",
            name,
            args,
        ));
        Self::new(vec![LlmResponse::from_content(call)])
    }

    /// Fails `failures` times with a transient error, then replies with text.
    pub fn fail_then_text(failures: usize, text: impl Into<String>) -> Self {
        let mut scripts: VecDeque<Script> = (0..failures)
            .map(|i| Script::Fail {
                code: "UNAVAILABLE".into(),
                message: format!("transient failure {i}"),
            })
            .collect();
        scripts.push_back(Script::Respond(LlmResponse::from_content(
            Content::model_text(text),
        )));
        Self {
            scripts: Mutex::new(scripts),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// How many times `generate`/`generate_stream` ran.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_response(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock() = Some(request.clone());

        let script = self.scripts.lock().pop_front();
        match script {
            Some(Script::Respond(mut resp)) => {
                if resp.usage.is_none() {
                    resp.usage = Some(Usage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                    });
                }
                *self.last.lock() = Some(resp.clone());
                Ok(resp)
            }
            Some(Script::Fail { code, message }) => Err(Error::Model { code, message }),
            None => self
                .last
                .lock()
                .clone()
                .ok_or_else(|| Error::Model {
                    code: "EMPTY_SCRIPT".into(),
                    message: "mock model has no scripted responses".into(),
                }),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for MockModel {
    fn model_id(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.next_response(request)
    }

    async fn generate_stream(
        &self,
        request: &LlmRequest,
    ) -> Result<BoxStream<'static, Result<LlmResponse>>> {
        let full = self.next_response(request)?;

        // Text-only responses stream word by word; anything with function
        // parts arrives as a single final chunk.
        let streamable = full
            .content
            .as_ref()
            .map(|c| !c.has_function_parts())
            .unwrap_or(false);
        if !streamable {
            return Ok(Box::pin(stream::iter(vec![Ok(full)])));
        }

        let text = full.content.as_ref().map(|c| c.text()).unwrap_or_default();
        let mut chunks: Vec<Result<LlmResponse>> = text
            .split_inclusive(' ')
            .map(|word| {
                Ok(LlmResponse {
                    content: Some(Content::model_text(word)),
                    partial: true,
                    ..Default::default()
                })
            })
            .collect();
        chunks.push(Ok(full));
        Ok(Box::pin(stream::iter(chunks)))
    }
}
