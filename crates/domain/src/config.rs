//! Runtime configuration, deserializable from TOML with per-field defaults.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Knobs governing one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Stream partial model output as it arrives.
    #[serde(default)]
    pub streaming: bool,

    /// Maximum model↔tool turns per invocation.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Soft tool-call budget; the loop force-stops at twice this.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,

    /// Per-tool-call deadline in seconds.
    #[serde(default = "default_tool_call_timeout_secs")]
    pub tool_call_timeout_secs: u64,

    /// Retries for transient model errors (and idempotent tool calls).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Window of recent tool-call fingerprints inspected for repetition.
    /// Clamped to `3..=32`.
    #[serde(default = "default_loop_window")]
    pub loop_window: usize,

    /// Buffer size of the per-invocation event channel.
    #[serde(default = "default_queue_buffer")]
    pub queue_buffer: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            max_turns: default_max_turns(),
            max_tool_calls: default_max_tool_calls(),
            tool_call_timeout_secs: default_tool_call_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            loop_window: default_loop_window(),
            queue_buffer: default_queue_buffer(),
        }
    }
}

impl RunConfig {
    pub fn tool_call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tool_call_timeout_secs.max(1))
    }

    /// The pattern-detection window, clamped to the allowed range `3..=32`.
    pub fn clamped_loop_window(&self) -> usize {
        self.loop_window.clamp(3, 32)
    }
}

fn default_max_turns() -> usize {
    10
}

fn default_max_tool_calls() -> usize {
    10
}

fn default_tool_call_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> usize {
    2
}

fn default_loop_window() -> usize {
    6
}

fn default_queue_buffer() -> usize {
    64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Listener settings for the wire-protocol server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Externally visible base URL advertised on the agent card.
    /// Defaults to `http://<bind>` when absent.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            base_url: None,
        }
    }
}

impl ServerConfig {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind))
    }
}

fn default_bind() -> String {
    "127.0.0.1:8484".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_defaults() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.max_turns, 10);
        assert_eq!(cfg.max_tool_calls, 10);
        assert_eq!(cfg.tool_call_timeout_secs, 30);
        assert_eq!(cfg.retry_attempts, 2);
        assert_eq!(cfg.loop_window, 6);
        assert_eq!(cfg.queue_buffer, 64);
        assert!(!cfg.streaming);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: RunConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.max_turns, 10);
        assert_eq!(cfg.loop_window, 6);
    }

    #[test]
    fn partial_toml_overrides_one_field() {
        let cfg: RunConfig = toml::from_str("max_turns = 3").unwrap();
        assert_eq!(cfg.max_turns, 3);
        assert_eq!(cfg.max_tool_calls, 10);
    }

    #[test]
    fn loop_window_clamped() {
        let cfg: RunConfig = toml::from_str("loop_window = 1").unwrap();
        assert_eq!(cfg.clamped_loop_window(), 3);
        let cfg: RunConfig = toml::from_str("loop_window = 100").unwrap();
        assert_eq!(cfg.clamped_loop_window(), 32);
    }

    #[test]
    fn server_base_url_falls_back_to_bind() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.effective_base_url(), "http://127.0.0.1:8484");
        let cfg = ServerConfig {
            bind: "0.0.0.0:1".into(),
            base_url: Some("https://agent.example.com".into()),
        };
        assert_eq!(cfg.effective_base_url(), "https://agent.example.com");
    }
}
