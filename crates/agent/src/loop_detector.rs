//! Detects runaway tool loops: a hard call budget and a repeating-pattern
//! check over a bounded window of recent call fingerprints.

use std::collections::VecDeque;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Tracks tool-call volume and the last `window` call fingerprints.
pub struct LoopDetector {
    total_tool_calls: usize,
    recent: VecDeque<String>,
    window: usize,
}

impl LoopDetector {
    /// `window` is clamped to at least 3 (a smaller window can never
    /// contain three consecutive occurrences).
    pub fn new(window: usize) -> Self {
        Self {
            total_tool_calls: 0,
            recent: VecDeque::new(),
            window: window.max(3),
        }
    }

    /// Record one executed tool call.
    pub fn record(&mut self, tool_name: &str, args: &Map<String, Value>) {
        self.total_tool_calls += 1;
        self.recent.push_back(fingerprint(tool_name, args));
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    pub fn total_tool_calls(&self) -> usize {
        self.total_tool_calls
    }

    /// True once the invocation has burned more than `2 × limit` calls.
    pub fn check_tool_call_limit(&self, limit: usize) -> bool {
        self.total_tool_calls > limit.saturating_mul(2)
    }

    /// True when the window ends in ≥3 consecutive identical fingerprints.
    pub fn check_repeating_pattern(&self) -> bool {
        if self.recent.len() < 3 {
            return false;
        }
        let mut run = 1;
        let mut best = 1;
        for pair in self.recent.iter().zip(self.recent.iter().skip(1)) {
            if pair.0 == pair.1 {
                run += 1;
                best = best.max(run);
            } else {
                run = 1;
            }
        }
        best >= 3
    }
}

/// `sha256(name ++ stable-json(args))`, hex. Stable JSON sorts object keys
/// recursively so argument ordering cannot defeat the comparison.
fn fingerprint(tool_name: &str, args: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(stable_json(&Value::Object(args.clone())).as_bytes());
    hex::encode(hasher.finalize())
}

fn stable_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        stable_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(stable_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn limit_is_twice_the_budget() {
        let mut detector = LoopDetector::new(6);
        for _ in 0..20 {
            detector.record("f", &Map::new());
        }
        assert!(!detector.check_tool_call_limit(10));
        detector.record("f", &Map::new());
        assert!(detector.check_tool_call_limit(10));
    }

    #[test]
    fn three_identical_calls_trip_the_pattern() {
        let mut detector = LoopDetector::new(6);
        detector.record("f", &args(json!({"x": 1})));
        detector.record("f", &args(json!({"x": 1})));
        assert!(!detector.check_repeating_pattern());
        detector.record("f", &args(json!({"x": 1})));
        assert!(detector.check_repeating_pattern());
    }

    #[test]
    fn differing_args_do_not_trip() {
        let mut detector = LoopDetector::new(6);
        detector.record("f", &args(json!({"x": 1})));
        detector.record("f", &args(json!({"x": 2})));
        detector.record("f", &args(json!({"x": 3})));
        assert!(!detector.check_repeating_pattern());
    }

    #[test]
    fn interleaved_calls_do_not_trip() {
        let mut detector = LoopDetector::new(6);
        for _ in 0..3 {
            detector.record("f", &args(json!({"x": 1})));
            detector.record("g", &args(json!({"x": 1})));
        }
        assert!(!detector.check_repeating_pattern());
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = fingerprint("f", &args(json!({"a": 1, "b": 2})));
        let b = fingerprint("f", &args(json!({"b": 2, "a": 1})));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_tool_names() {
        let a = fingerprint("f", &Map::new());
        let b = fingerprint("g", &Map::new());
        assert_ne!(a, b);
    }

    #[test]
    fn window_bounds_memory() {
        let mut detector = LoopDetector::new(4);
        for i in 0..100 {
            detector.record("f", &args(json!({"i": i})));
        }
        assert_eq!(detector.recent.len(), 4);
        assert_eq!(detector.total_tool_calls(), 100);
    }

    #[test]
    fn repeats_older_than_window_are_forgotten() {
        let mut detector = LoopDetector::new(3);
        detector.record("f", &args(json!({"x": 1})));
        detector.record("f", &args(json!({"x": 1})));
        detector.record("g", &args(json!({"y": 1})));
        detector.record("h", &args(json!({"z": 1})));
        assert!(!detector.check_repeating_pattern());
    }
}
