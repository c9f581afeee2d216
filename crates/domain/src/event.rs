//! The event record — the atomic unit of agent output.
//!
//! Events are immutable once published: the loop builds one with the setters
//! below, sends it down the invocation's channel, and the session service
//! appends it. Side effects (state deltas, artifact versions, control flags)
//! ride along in `EventActions` and are merged into the session on append.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::{Content, Part};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventActions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Side effects carried by an event, applied when the event is appended to
/// its session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    /// Session state changes keyed by state key.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state_delta: Map<String, Value>,

    /// Artifact versions written during this event, filename → version.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub artifact_delta: HashMap<String, u64>,

    /// Hand the conversation to the named agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,

    /// Escalate to the parent agent and stop this invocation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub escalate: bool,

    /// Deliver the tool result verbatim, without a summarization turn.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_summarization: bool,

    /// Credential requests recorded by tools, keyed by credential id.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub requested_auth_configs: Map<String, Value>,
}

impl EventActions {
    /// Fold `other` into self. Scalars from `other` win when set.
    pub fn merge(&mut self, other: EventActions) {
        self.state_delta.extend(other.state_delta);
        self.artifact_delta.extend(other.artifact_delta);
        if other.transfer_to_agent.is_some() {
            self.transfer_to_agent = other.transfer_to_agent;
        }
        self.escalate |= other.escalate;
        self.skip_summarization |= other.skip_summarization;
        self.requested_auth_configs
            .extend(other.requested_auth_configs);
    }

    pub fn is_empty(&self) -> bool {
        self.state_delta.is_empty()
            && self.artifact_delta.is_empty()
            && self.transfer_to_agent.is_none()
            && !self.escalate
            && !self.skip_summarization
            && self.requested_auth_configs.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of agent output, appended to the session after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// The producing agent's name (or `"user"` for user turns).
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "EventActions::is_empty")]
    pub actions: EventActions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Ids of function calls in this event that run as long-running tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_tool_ids: Vec<String>,
    /// True for intermediate chunks of a streamed model turn.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_metadata: Map<String, Value>,
}

impl Event {
    /// Create an event with a fresh unique id and the current timestamp.
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            content: None,
            actions: EventActions::default(),
            branch: None,
            timestamp: Utc::now(),
            long_running_tool_ids: Vec::new(),
            partial: false,
            turn_complete: false,
            error_code: None,
            error_message: None,
            interrupted: false,
            custom_metadata: Map::new(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn turn_complete(mut self, done: bool) -> Self {
        self.turn_complete = done;
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }

    pub fn interrupted(mut self, interrupted: bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Whether this event is a final, user-facing response.
    ///
    /// True when summarization is skipped, when long-running tools were
    /// launched, or when the content carries no function parts and the event
    /// is not a partial chunk.
    pub fn is_final_response(&self) -> bool {
        if self.actions.skip_summarization || !self.long_running_tool_ids.is_empty() {
            return true;
        }
        let has_function_parts = self
            .content
            .as_ref()
            .is_some_and(|c| c.has_function_parts());
        !has_function_parts && !self.partial
    }

    pub fn function_calls(&self) -> Vec<Part> {
        self.content
            .as_ref()
            .map(|c| c.function_calls())
            .unwrap_or_default()
    }

    pub fn function_responses(&self) -> Vec<Part> {
        self.content
            .as_ref()
            .map(|c| c.function_responses())
            .unwrap_or_default()
    }
}
