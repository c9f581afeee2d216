//! Invocation context — per-invocation data threaded through the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aw_domain::{CancelToken, Content, RunConfig};
use aw_services::{Services, Session, SessionKey};

/// Everything one agent invocation carries: identity, the session snapshot,
/// the current user content, service handles, and the cancellation token.
/// Owns no persistent resources — services are borrowed from the host.
#[derive(Clone)]
pub struct InvocationContext {
    pub invocation_id: String,
    /// Dot-separated path of agent names for nested invocations.
    pub branch: Option<String>,
    pub user_content: Option<Content>,
    /// Snapshot taken at invocation start; prior events form the history.
    pub session: Session,
    pub services: Services,
    pub run_config: RunConfig,
    pub cancel: CancelToken,
    end_invocation: Arc<AtomicBool>,
}

impl InvocationContext {
    pub fn new(
        session: Session,
        user_content: Option<Content>,
        services: Services,
        run_config: RunConfig,
    ) -> Self {
        Self {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            branch: None,
            user_content,
            session,
            services,
            run_config,
            cancel: CancelToken::new(),
            end_invocation: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_key(&self) -> SessionKey {
        self.session.key()
    }

    /// Clone for a child agent, appending `"." + branch` to the branch path.
    /// The cancel token is shared, so cancelling the parent stops children.
    pub fn child(&self, branch: &str) -> Self {
        let mut ctx = self.clone();
        ctx.branch = Some(match &self.branch {
            Some(parent) => format!("{parent}.{branch}"),
            None => branch.to_owned(),
        });
        ctx
    }

    /// Request the whole invocation to wind down after the current event.
    pub fn end_invocation(&self) {
        self.end_invocation.store(true, Ordering::Release);
    }

    pub fn is_ended(&self) -> bool {
        self.end_invocation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn session() -> Session {
        Session {
            id: "s1".into(),
            app_name: "app".into(),
            user_id: "user".into(),
            state: Map::new(),
            events: Vec::new(),
            last_update: Utc::now(),
        }
    }

    #[test]
    fn child_branches_accumulate() {
        let root = InvocationContext::new(
            session(),
            Some(Content::user_text("hi")),
            Services::default(),
            RunConfig::default(),
        );
        assert!(root.branch.is_none());

        let child = root.child("writer");
        assert_eq!(child.branch.as_deref(), Some("writer"));

        let grandchild = child.child("critic");
        assert_eq!(grandchild.branch.as_deref(), Some("writer.critic"));
        assert_eq!(grandchild.invocation_id, root.invocation_id);
    }

    #[test]
    fn cancel_propagates_to_children() {
        let root = InvocationContext::new(
            session(),
            None,
            Services::default(),
            RunConfig::default(),
        );
        let child = root.child("sub");
        root.cancel.cancel();
        assert!(child.cancel.is_cancelled());
    }

    #[test]
    fn end_invocation_is_shared() {
        let root = InvocationContext::new(
            session(),
            None,
            Services::default(),
            RunConfig::default(),
        );
        let child = root.child("sub");
        child.end_invocation();
        assert!(root.is_ended());
    }
}
