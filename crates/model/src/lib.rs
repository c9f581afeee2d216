//! The abstract model-backend contract.
//!
//! Concrete adapters (hosted APIs, local inference) implement
//! [`LanguageModel`]; the agent loop only depends on this trait. The crate
//! also ships a scripted mock backend for tests.

pub mod mock;

pub use mock::MockModel;

use aw_domain::{BoxStream, LlmRequest, LlmResponse, Result};

/// Trait every model adapter must implement.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier (e.g. `"mock"`, a hosted model name).
    fn model_id(&self) -> &str;

    /// One request, one full response.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// One request, a stream of partial responses; the final item carries
    /// `partial = false` and the accumulated content.
    async fn generate_stream(
        &self,
        request: &LlmRequest,
    ) -> Result<BoxStream<'static, Result<LlmResponse>>>;

    /// Release any held connections. Default: nothing to do.
    async fn close(&self) {}
}
