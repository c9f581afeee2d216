//! Memory service — long-term recall over past session events.
//!
//! The in-memory implementation keeps an inverted view per `(app, user)`
//! and scores events by how many lowercase query words their text contains.

use std::collections::HashMap;

use parking_lot::RwLock;

use aw_domain::{Event, Result};

use crate::session::Session;

#[async_trait::async_trait]
pub trait MemoryService: Send + Sync {
    /// Ingest a session's events for later recall.
    async fn add_session_to_memory(&self, session: &Session) -> Result<()>;

    /// The most relevant remembered events for a query, best first, capped
    /// at `limit`.
    async fn retrieve_relevant(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Event>>;
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Reference implementation: keyword-match scoring over stored events.
#[derive(Default)]
pub struct InMemoryMemoryService {
    /// (app, user) → remembered events.
    events: RwLock<HashMap<(String, String), Vec<Event>>>,
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn add_session_to_memory(&self, session: &Session) -> Result<()> {
        let mut events = self.events.write();
        let bucket = events
            .entry((session.app_name.clone(), session.user_id.clone()))
            .or_default();
        bucket.extend(
            session
                .events
                .iter()
                .filter(|e| e.content.is_some())
                .cloned(),
        );
        tracing::debug!(
            app = %session.app_name,
            session_id = %session.id,
            remembered = bucket.len(),
            "session added to memory"
        );
        Ok(())
    }

    async fn retrieve_relevant(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let words = tokenize(query);
        if words.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let events = self.events.read();
        let Some(bucket) = events.get(&(app_name.to_owned(), user_id.to_owned())) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(usize, &Event)> = bucket
            .iter()
            .filter_map(|event| {
                let text = event.content.as_ref()?.text().to_lowercase();
                let score = words.iter().filter(|w| text.contains(w.as_str())).count();
                (score > 0).then_some((score, event))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}
