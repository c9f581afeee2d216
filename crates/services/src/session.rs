//! Session service — owns sessions and serializes event appends.
//!
//! A session is created per `(app, user, id)` triple and mutated only by
//! appending events; an event's `state_delta` is folded into session state
//! atomically with the append.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aw_domain::{Error, Event, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identifies a session: application, user, session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// A conversation history plus its committed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub events: Vec<Event>,
    pub last_update: DateTime<Utc>,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, &self.id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    /// Create a session. A `None` id mints a fresh UUID. Returns the
    /// existing session unchanged when the triple already exists.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<Session>;

    async fn get_session(&self, key: &SessionKey) -> Result<Session>;

    /// Append an event atomically: fold its `state_delta` into session
    /// state, push the event, and bump `last_update` (never backwards).
    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<Event>;

    async fn delete_session(&self, key: &SessionKey) -> Result<()>;

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reference implementation backed by a map under a write lock; appends to
/// the same session are linearized by the lock.
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionService for InMemorySessionService {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<Session> {
        let id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = SessionKey::new(app_name, user_id, &id);

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&key) {
            return Ok(existing.clone());
        }

        let session = Session {
            id,
            app_name: app_name.to_owned(),
            user_id: user_id.to_owned(),
            state: Map::new(),
            events: Vec::new(),
            last_update: Utc::now(),
        };
        sessions.insert(key, session.clone());
        tracing::debug!(
            app = app_name,
            user = user_id,
            session_id = %session.id,
            "session created"
        );
        Ok(session)
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Session> {
        self.sessions
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {}", key.session_id)))
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<Event> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("session {}", key.session_id)))?;

        session
            .state
            .extend(event.actions.state_delta.clone());
        session.last_update = session.last_update.max(event.timestamp).max(Utc::now());
        session.events.push(event.clone());
        Ok(event)
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<()> {
        self.sessions.write().remove(key);
        Ok(())
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
        let sessions = self.sessions.read();
        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|s| s.app_name == app_name && s.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }
}
