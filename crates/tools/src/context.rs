//! Per-call tool context — the tool's window onto the invocation.
//!
//! Reads go delta-first (a value written earlier in the same call is visible
//! immediately); writes and control flags are buffered in an `EventActions`
//! that the loop folds into the function-response event.

use serde_json::{Map, Value};

use aw_domain::{Error, Event, EventActions, Result, State};
use aw_services::{Credential, Services, SessionKey};

/// Context handed to a tool for one call.
pub struct ToolContext {
    pub invocation_id: String,
    /// Id of the function-call part that triggered this tool.
    pub function_call_id: String,
    pub agent_name: String,
    session_key: SessionKey,
    services: Services,
    state: State,
    actions: EventActions,
}

impl ToolContext {
    pub fn new(
        invocation_id: impl Into<String>,
        function_call_id: impl Into<String>,
        agent_name: impl Into<String>,
        session_key: SessionKey,
        session_state: Map<String, Value>,
        services: Services,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            function_call_id: function_call_id.into(),
            agent_name: agent_name.into(),
            session_key,
            services,
            state: State::new(session_state),
            actions: EventActions::default(),
        }
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    // ── State ──────────────────────────────────────────────────────

    /// Read a state value: this call's pending writes first, then the
    /// session snapshot.
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Buffer a state write; it lands in the event's `state_delta`.
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.set(key, value);
    }

    // ── Artifacts ──────────────────────────────────────────────────

    pub async fn save_artifact(
        &mut self,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<u64> {
        let service = self
            .services
            .artifact
            .clone()
            .ok_or_else(|| Error::Other("no artifact service configured".into()))?;
        let version = service
            .save_artifact(&self.session_key, filename, bytes, mime_type)
            .await?;
        self.actions
            .artifact_delta
            .insert(filename.to_owned(), version);
        Ok(version)
    }

    pub async fn load_artifact(&self, filename: &str, version: Option<u64>) -> Result<Vec<u8>> {
        let service = self
            .services
            .artifact
            .clone()
            .ok_or_else(|| Error::Other("no artifact service configured".into()))?;
        Ok(service
            .load_artifact(&self.session_key, filename, version)
            .await?
            .bytes)
    }

    pub async fn list_artifacts(&self) -> Result<Vec<String>> {
        let service = self
            .services
            .artifact
            .clone()
            .ok_or_else(|| Error::Other("no artifact service configured".into()))?;
        service.list_artifact_keys(&self.session_key).await
    }

    // ── Memory ─────────────────────────────────────────────────────

    pub async fn search_memory(&self, query: &str, limit: usize) -> Result<Vec<Event>> {
        let service = self
            .services
            .memory
            .clone()
            .ok_or_else(|| Error::Other("no memory service configured".into()))?;
        service
            .retrieve_relevant(
                &self.session_key.app_name,
                &self.session_key.user_id,
                query,
                limit,
            )
            .await
    }

    // ── Credentials ────────────────────────────────────────────────

    /// Record a credential request in the event actions; the host resolves
    /// it out of band.
    pub fn request_credential(&mut self, id: impl Into<String>, auth_config: Value) {
        self.actions
            .requested_auth_configs
            .insert(id.into(), auth_config);
    }

    pub async fn get_credential(&self, id: &str) -> Result<Credential> {
        let service = self
            .services
            .credential
            .clone()
            .ok_or_else(|| Error::Other("no credential service configured".into()))?;
        service.get_credential(id).await
    }

    // ── Control flags ──────────────────────────────────────────────

    pub fn transfer_to_agent(&mut self, name: impl Into<String>) {
        self.actions.transfer_to_agent = Some(name.into());
    }

    pub fn escalate(&mut self) {
        self.actions.escalate = true;
    }

    pub fn skip_summarization(&mut self) {
        self.actions.skip_summarization = true;
    }

    /// Consume the context into the actions for the function-response
    /// event, folding buffered state writes into `state_delta`.
    pub fn into_actions(mut self) -> EventActions {
        let delta = self.state.take_delta();
        self.actions.state_delta.extend(delta);
        self.actions
    }
}
