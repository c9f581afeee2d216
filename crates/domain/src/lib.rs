//! Core domain types shared by every AgentWire crate: content parts, events,
//! scoped state, model request/response shapes, cancellation, configuration,
//! and the common error type.

pub mod cancel;
pub mod config;
pub mod content;
pub mod error;
pub mod event;
pub mod llm;
pub mod state;
pub mod stream;

pub use cancel::CancelToken;
pub use config::{RunConfig, ServerConfig};
pub use content::{Content, FileSource, Part, Role};
pub use error::{Error, Result};
pub use event::{Event, EventActions};
pub use llm::{FunctionDeclaration, GenerateConfig, LlmRequest, LlmResponse, Usage};
pub use state::State;
pub use stream::BoxStream;
