use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_MODEL: &str = "gemma3:1b";

/// generation parameters, persisted as one record.
///
/// every field falls back to its default on its own, so a stored record that
/// predates a field (or lost one) still loads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// a single settings-control change.
#[derive(Clone, Debug, PartialEq)]
pub enum SettingsChange {
    Temperature(f32),
    MaxTokens(u32),
    Model(String),
}

impl Settings {
    /// values are taken as-is; range limits belong to the input control.
    pub fn apply(&mut self, change: SettingsChange) {
        match change {
            SettingsChange::Temperature(t) => self.temperature = t,
            SettingsChange::MaxTokens(n) => self.max_tokens = n,
            SettingsChange::Model(m) => self.model = m,
        }
    }
}
