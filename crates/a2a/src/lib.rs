//! The wire-protocol layer: JSON-RPC server and client, the task registry
//! and its state machine, the executor bridging agents onto the wire, and
//! lossless converters between internal and wire events.

pub mod client;
pub mod convert;
pub mod error;
pub mod executor;
pub mod jsonrpc;
pub mod queue;
pub mod remote_agent;
pub mod server;
pub mod task;
pub mod types;

pub use client::{A2aClient, CardResolver, ClientError};
pub use error::A2aError;
pub use executor::AgentExecutor;
pub use jsonrpc::{JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};
pub use queue::{EventQueue, QueueError};
pub use remote_agent::RemoteAgent;
pub use server::A2aServer;
pub use task::TaskManager;
pub use types::{
    AgentCapabilities, AgentCard, AgentSkill, MessageSendParams, PushNotificationConfig,
    StreamResult, Task, TaskArtifactUpdateEvent, TaskIdParams, TaskPushNotificationConfig,
    TaskQueryParams, TaskState, TaskStatus, TaskStatusUpdateEvent, WireArtifact, WireMessage,
    WirePart, WireRole,
};
