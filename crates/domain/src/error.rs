/// Shared error type used across all AgentWire crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("model {code}: {message}")]
    Model { code: String, message: String },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("too many active tasks for tool {0}")]
    TooManyActiveTasks(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invocation cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
