//! key-value persistence for the two records the client keeps: settings and
//! chat history. stores deal in raw text; [`Persistence`] owns the json.

use std::collections::HashMap;

use bevy::log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::settings::Settings;
use crate::turn::Turn;

pub const SETTINGS_KEY: &str = "settings";
pub const HISTORY_KEY: &str = "chat-history";

/// a string-to-string store. a missing key is `Ok(None)`, never an error.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> ChatResult<Option<String>>;
    fn set_item(&mut self, key: &str, value: &str) -> ChatResult<()>;
    fn remove_item(&mut self, key: &str) -> ChatResult<()>;
}

/// in-process store; nothing survives the process.
#[derive(Default, Debug, Clone)]
pub struct MemoryStore {
    items: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> ChatResult<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> ChatResult<()> {
        self.items.remove(key);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::FileStore;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use super::KeyValueStore;
    use crate::error::{ChatError, ChatResult};

    /// one `<key>.json` file per key under a directory.
    #[derive(Debug, Clone)]
    pub struct FileStore {
        dir: PathBuf,
    }

    impl FileStore {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        fn path_for(&self, key: &str) -> PathBuf {
            self.dir.join(format!("{key}.json"))
        }
    }

    impl KeyValueStore for FileStore {
        fn get_item(&self, key: &str) -> ChatResult<Option<String>> {
            match fs::read_to_string(self.path_for(key)) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ChatError::Storage(e.to_string())),
            }
        }

        fn set_item(&mut self, key: &str, value: &str) -> ChatResult<()> {
            fs::create_dir_all(&self.dir).map_err(|e| ChatError::Storage(e.to_string()))?;
            fs::write(self.path_for(key), value).map_err(|e| ChatError::Storage(e.to_string()))
        }

        fn remove_item(&mut self, key: &str) -> ChatResult<()> {
            match fs::remove_file(self.path_for(key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ChatError::Storage(e.to_string())),
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use web::LocalStorage;

#[cfg(target_arch = "wasm32")]
mod web {
    use wasm_bindgen::JsValue;

    use super::KeyValueStore;
    use crate::error::{ChatError, ChatResult};

    /// `window.localStorage`. looked up per call so the handle stays `Send`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LocalStorage;

    fn js_err(e: JsValue) -> ChatError {
        ChatError::Storage(format!("{e:?}"))
    }

    fn storage() -> ChatResult<web_sys::Storage> {
        let window = web_sys::window().ok_or_else(|| ChatError::Storage("no window".into()))?;
        window
            .local_storage()
            .map_err(js_err)?
            .ok_or_else(|| ChatError::Storage("localStorage unavailable".into()))
    }

    impl KeyValueStore for LocalStorage {
        fn get_item(&self, key: &str) -> ChatResult<Option<String>> {
            storage()?.get_item(key).map_err(js_err)
        }

        fn set_item(&mut self, key: &str, value: &str) -> ChatResult<()> {
            storage()?.set_item(key, value).map_err(js_err)
        }

        fn remove_item(&mut self, key: &str) -> ChatResult<()> {
            storage()?.remove_item(key).map_err(js_err)
        }
    }
}

/// the store the plugin uses on this target.
#[cfg(not(target_arch = "wasm32"))]
pub type DefaultStore = FileStore;
#[cfg(target_arch = "wasm32")]
pub type DefaultStore = LocalStorage;

#[cfg(not(target_arch = "wasm32"))]
pub fn default_store(config: &ChatConfig) -> DefaultStore {
    FileStore::new(&config.storage_dir)
}

#[cfg(target_arch = "wasm32")]
pub fn default_store(_config: &ChatConfig) -> DefaultStore {
    LocalStorage
}

/// json (de)serialization plus the settings/history record policies.
#[derive(Debug, Clone)]
pub struct Persistence<S> {
    store: S,
    history_limit: usize,
}

impl<S: KeyValueStore> Persistence<S> {
    pub fn new(store: S, history_limit: usize) -> Self {
        Self { store, history_limit }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn save<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> ChatResult<()> {
        let text = serde_json::to_string(value).map_err(|e| ChatError::Storage(e.to_string()))?;
        self.store.set_item(key, &text)
    }

    /// `Ok(None)` when absent, `Err(Parse)` when present but unreadable.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> ChatResult<Option<T>> {
        match self.store.get_item(key)? {
            None => Ok(None),
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| ChatError::Parse(format!("{key}: {e}"))),
        }
    }

    pub fn remove(&mut self, key: &str) -> ChatResult<()> {
        self.store.remove_item(key)
    }

    /// stored settings, or defaults when missing or corrupt.
    pub fn load_settings(&self) -> Settings {
        match self.load::<Settings>(SETTINGS_KEY) {
            Ok(Some(s)) => s,
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!(target: "bevy_ollama_chat", "settings fallback to defaults: {}", e);
                Settings::default()
            }
        }
    }

    pub fn save_settings(&mut self, settings: &Settings) -> ChatResult<()> {
        self.save(SETTINGS_KEY, settings)
    }

    /// stored history, or empty when missing or corrupt.
    pub fn load_history(&self) -> Vec<Turn> {
        match self.load::<Vec<Turn>>(HISTORY_KEY) {
            Ok(Some(turns)) => turns,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(target: "bevy_ollama_chat", "history fallback to empty: {}", e);
                Vec::new()
            }
        }
    }

    /// writes only the trailing `history_limit` turns.
    pub fn save_history(&mut self, history: &[Turn]) -> ChatResult<()> {
        let start = history.len().saturating_sub(self.history_limit);
        debug!(target: "bevy_ollama_chat", "persist history: {} of {} turns", history.len() - start, history.len());
        self.save(HISTORY_KEY, &history[start..])
    }

    pub fn clear_history(&mut self) -> ChatResult<()> {
        self.remove(HISTORY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsChange;
    use pretty_assertions::assert_eq;

    fn persistence() -> Persistence<MemoryStore> {
        Persistence::new(MemoryStore::new(), 50)
    }

    #[test]
    fn load_of_missing_key_is_none() {
        let p = persistence();
        assert_eq!(p.load::<Settings>(SETTINGS_KEY), Ok(None));
    }

    #[test]
    fn corrupt_record_is_a_parse_error() {
        let mut store = MemoryStore::new();
        store.set_item(SETTINGS_KEY, "{not json").unwrap();
        let p = Persistence::new(store, 50);
        assert!(matches!(p.load::<Settings>(SETTINGS_KEY), Err(ChatError::Parse(_))));
        assert_eq!(p.load_settings(), Settings::default());
    }

    #[test]
    fn settings_survive_a_round_trip() {
        let mut p = persistence();
        let mut s = Settings::default();
        s.apply(SettingsChange::Model("qwen2.5:3b".into()));
        s.apply(SettingsChange::Temperature(0.2));
        p.save_settings(&s).unwrap();
        assert_eq!(p.load_settings(), s);
    }

    #[test]
    fn partial_settings_record_fills_defaults() {
        let mut store = MemoryStore::new();
        store.set_item(SETTINGS_KEY, r#"{"temperature":0.1}"#).unwrap();
        let p = Persistence::new(store, 50);
        let s = p.load_settings();
        assert_eq!(s.temperature, 0.1);
        assert_eq!(s.max_tokens, 500);
        assert_eq!(s.model, "gemma3:1b");
    }

    #[test]
    fn history_is_capped_to_its_most_recent_suffix() {
        let mut p = persistence();
        let history: Vec<Turn> = (0..73).map(|i| Turn::user(format!("m{i}"))).collect();
        p.save_history(&history).unwrap();

        let stored = p.load_history();
        assert_eq!(stored.len(), 50);
        assert_eq!(stored.as_slice(), &history[23..]);
    }

    #[test]
    fn short_history_is_stored_whole() {
        let mut p = persistence();
        let history = vec![Turn::user("a"), Turn::assistant("b")];
        p.save_history(&history).unwrap();
        assert_eq!(p.load_history(), history);
    }

    #[test]
    fn clearing_history_removes_the_record() {
        let mut p = persistence();
        p.save_history(&[Turn::user("a")]).unwrap();
        p.clear_history().unwrap();
        assert_eq!(p.store().get_item(HISTORY_KEY), Ok(None));
        assert!(p.load_history().is_empty());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn file_store_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested");

        let mut first = Persistence::new(FileStore::new(&root), 50);
        assert_eq!(first.store().dir(), root.as_path());
        first.save_history(&[Turn::user("hello"), Turn::assistant("hi")]).unwrap();

        let second = Persistence::new(FileStore::new(&root), 50);
        assert_eq!(second.load_history(), vec![Turn::user("hello"), Turn::assistant("hi")]);
        assert!(root.join("chat-history.json").exists());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn file_store_remove_of_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        assert_eq!(store.remove_item("nope"), Ok(()));
        assert_eq!(store.get_item("nope"), Ok(None));
    }
}
