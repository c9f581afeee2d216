//! Lossless conversion between internal events and wire events.
//!
//! Function-call and function-response parts cross the wire as `data` parts
//! carrying an `adk:type` metadata marker, so a consumer reconstructs the
//! original variant exactly. Text and data parts map one-to-one.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use aw_domain::{Content, Event, Part, Role};
use aw_services::SessionKey;

use crate::types::{
    TaskArtifactUpdateEvent, TaskState, TaskStatus, TaskStatusUpdateEvent, StreamResult,
    WireArtifact, WireMessage, WirePart, WireRole,
};

/// Metadata key marking a data part as a round-tripped function part.
pub const PART_TYPE_KEY: &str = "adk:type";
pub const PART_TYPE_FUNCTION_CALL: &str = "function_call";
pub const PART_TYPE_FUNCTION_RESPONSE: &str = "function_response";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn marker(kind: &str) -> Option<Map<String, Value>> {
    let mut metadata = Map::new();
    metadata.insert(PART_TYPE_KEY.into(), json!(kind));
    Some(metadata)
}

pub fn internal_part_to_wire(part: &Part) -> WirePart {
    match part {
        Part::Text { text, metadata } => WirePart::Text {
            text: text.clone(),
            metadata: metadata.clone(),
        },
        Part::FunctionCall { id, name, args, .. } => {
            let mut data = Map::new();
            data.insert("id".into(), json!(id));
            data.insert("name".into(), json!(name));
            data.insert("args".into(), Value::Object(args.clone()));
            WirePart::Data {
                data,
                metadata: marker(PART_TYPE_FUNCTION_CALL),
            }
        }
        Part::FunctionResponse {
            id,
            name,
            response,
            ..
        } => {
            let mut data = Map::new();
            data.insert("id".into(), json!(id));
            data.insert("name".into(), json!(name));
            data.insert("response".into(), Value::Object(response.clone()));
            WirePart::Data {
                data,
                metadata: marker(PART_TYPE_FUNCTION_RESPONSE),
            }
        }
        Part::File {
            name,
            mime_type,
            source,
            metadata,
        } => WirePart::File {
            name: name.clone(),
            mime_type: mime_type.clone(),
            source: source.clone(),
            metadata: metadata.clone(),
        },
        Part::Data { data, metadata } => WirePart::Data {
            data: data.clone(),
            metadata: metadata.clone(),
        },
    }
}

pub fn wire_part_to_internal(part: &WirePart) -> Part {
    match part {
        WirePart::Text { text, metadata } => Part::Text {
            text: text.clone(),
            metadata: metadata.clone(),
        },
        WirePart::File {
            name,
            mime_type,
            source,
            metadata,
        } => Part::File {
            name: name.clone(),
            mime_type: mime_type.clone(),
            source: source.clone(),
            metadata: metadata.clone(),
        },
        WirePart::Data { data, metadata } => {
            let kind = metadata
                .as_ref()
                .and_then(|m| m.get(PART_TYPE_KEY))
                .and_then(|v| v.as_str());
            let object = |key: &str| {
                data.get(key)
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default()
            };
            let field = |key: &str| {
                data.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned()
            };
            match kind {
                Some(PART_TYPE_FUNCTION_CALL) => {
                    Part::function_call(field("id"), field("name"), object("args"))
                }
                Some(PART_TYPE_FUNCTION_RESPONSE) => {
                    Part::function_response(field("id"), field("name"), object("response"))
                }
                _ => Part::Data {
                    data: data.clone(),
                    metadata: metadata.clone(),
                },
            }
        }
    }
}

/// Convert an inbound wire message into internal content.
pub fn wire_message_to_content(message: &WireMessage) -> Content {
    let role = match message.role {
        WireRole::User => Role::User,
        WireRole::Agent => Role::Agent,
    };
    Content {
        role,
        parts: message.parts.iter().map(wire_part_to_internal).collect(),
    }
}

pub fn content_to_wire_message(content: &Content) -> WireMessage {
    let role = match content.role {
        Role::User => WireRole::User,
        _ => WireRole::Agent,
    };
    let mut message = WireMessage::agent_parts(
        content.parts.iter().map(internal_part_to_wire).collect(),
    );
    message.role = role;
    message
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic artifact id from the artifact's full coordinates.
pub fn artifact_id(key: &SessionKey, filename: &str, version: u64) -> String {
    let mut hasher = Sha256::new();
    for field in [
        key.app_name.as_str(),
        key.user_id.as_str(),
        key.session_id.as_str(),
        filename,
    ] {
        hasher.update(field.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(version.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// The wire state implied by one internal event.
pub fn event_state(event: &Event) -> TaskState {
    if event.error_code.is_some() {
        return TaskState::Failed;
    }
    if event.interrupted {
        return TaskState::Canceled;
    }
    if !event.long_running_tool_ids.is_empty() {
        return TaskState::InputRequired;
    }
    if event.turn_complete {
        return TaskState::Completed;
    }
    TaskState::Working
}

/// Map one internal event to its wire events, in emission order.
pub fn event_to_wire(
    event: &Event,
    task_id: &str,
    context_id: Option<&str>,
    session_key: &SessionKey,
) -> Vec<StreamResult> {
    let mut out = Vec::new();
    let state = event_state(event);

    // Artifact deltas first: their versions exist before the status that
    // announces them.
    for (filename, version) in &event.actions.artifact_delta {
        out.push(StreamResult::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: task_id.to_owned(),
            context_id: context_id.map(str::to_owned),
            artifact: WireArtifact {
                artifact_id: artifact_id(session_key, filename, *version),
                name: Some(filename.clone()),
                description: None,
                parts: Vec::new(),
                metadata: Map::new(),
                extensions: Vec::new(),
            },
            metadata: Map::new(),
        }));
    }

    let message = match (&event.content, &event.error_message) {
        (Some(content), _) if !content.parts.is_empty() => {
            let mut message = content_to_wire_message(content);
            message.role = WireRole::Agent;
            message.task_id = Some(task_id.to_owned());
            message.context_id = context_id.map(str::to_owned);
            Some(message)
        }
        (_, Some(error)) => {
            let mut message = WireMessage::agent_text(error.clone());
            message.task_id = Some(task_id.to_owned());
            message.context_id = context_id.map(str::to_owned);
            Some(message)
        }
        _ => None,
    };

    if message.is_some() || state != TaskState::Working {
        out.push(StreamResult::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.to_owned(),
            context_id: context_id.map(str::to_owned),
            status: TaskStatus {
                state,
                message,
                timestamp: Some(event.timestamp),
            },
            final_: state.is_terminal(),
            metadata: Map::new(),
        }));
    }

    out
}
