use std::path::PathBuf;
use std::time::Duration;

use bevy::log::warn;
use bevy::prelude::Resource;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_CONTEXT_TURNS: usize = 6;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_ERROR_DISPLAY: Duration = Duration::from_secs(5);

/// client-side knobs. settings the user edits live in [`crate::Settings`].
#[derive(Resource, Clone, Debug, PartialEq)]
pub struct ChatConfig {
    /// ollama host, without a trailing `/api`.
    pub base_url: String,
    /// `None` waits until the transport gives up. native only.
    pub request_timeout: Option<Duration>,
    /// trailing turns sent as context with each prompt.
    pub context_turns: usize,
    /// most recent turns kept in the persisted history record.
    pub history_limit: usize,
    /// how long an exchange error stays on screen.
    pub error_display: Duration,
    /// root of the native file store.
    pub storage_dir: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: None,
            context_turns: DEFAULT_CONTEXT_TURNS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            error_display: DEFAULT_ERROR_DISPLAY,
            storage_dir: PathBuf::from(".bevy_ollama_chat"),
        }
    }
}

impl ChatConfig {
    /// defaults overlaid with `OLLAMA_BASE_URL`, `OLLAMA_TIMEOUT_SECS` and
    /// `OLLAMA_CHAT_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(url) = lookup("OLLAMA_BASE_URL").filter(|s| !s.trim().is_empty()) {
            cfg.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup("OLLAMA_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => cfg.request_timeout = None,
                Ok(secs) => cfg.request_timeout = Some(Duration::from_secs(secs)),
                Err(_) => warn!(target: "bevy_ollama_chat", "ignoring OLLAMA_TIMEOUT_SECS='{}'", raw),
            }
        }
        if let Some(dir) = lookup("OLLAMA_CHAT_DIR").filter(|s| !s.trim().is_empty()) {
            cfg.storage_dir = PathBuf::from(dir);
        }
        cfg
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }
}
