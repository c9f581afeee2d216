//! Scoped state — a committed base map plus a pending-delta view.
//!
//! Tool contexts write into the delta; reads see the delta first so a value
//! written during a tool call is visible before the owning event is appended
//! to the session. `take_delta` hands the pending writes to the event's
//! actions, and the session service folds them into the base on append.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct State {
    base: Map<String, Value>,
    delta: Map<String, Value>,
}

impl State {
    pub fn new(base: Map<String, Value>) -> Self {
        Self {
            base,
            delta: Map::new(),
        }
    }

    /// Read a value, pending delta first, then the committed base.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.delta.get(key).or_else(|| self.base.get(key))
    }

    /// Buffer a write in the pending delta.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.delta.insert(key.into(), value);
    }

    /// Buffer several writes at once.
    pub fn update(&mut self, values: Map<String, Value>) {
        self.delta.extend(values);
    }

    pub fn has_delta(&self) -> bool {
        !self.delta.is_empty()
    }

    /// Take the pending delta, leaving it empty.
    pub fn take_delta(&mut self) -> Map<String, Value> {
        std::mem::take(&mut self.delta)
    }

    /// Fold the pending delta into the base.
    pub fn commit(&mut self) {
        let delta = std::mem::take(&mut self.delta);
        self.base.extend(delta);
    }

    /// Render the merged view (delta wins over base).
    pub fn to_map(&self) -> Map<String, Value> {
        let mut merged = self.base.clone();
        merged.extend(self.delta.clone());
        merged
    }
}
