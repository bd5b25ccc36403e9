use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::TileCode;

/// Key under which the applied desired-tiles text persists between runs.
pub const STORAGE_KEY_TEXT: &str = "desired_tiles_text";

/// Normalizes raw input into identifier codes: uppercase, everything that
/// is not A-Z or '?' dropped. '?' needs no translation, its character code
/// is the blank tile's code.
pub fn parse_desired(input: &str) -> Vec<TileCode> {
    input
        .to_uppercase()
        .chars()
        .filter(|c| matches!(c, 'A'..='Z' | '?'))
        .map(|c| c as TileCode)
        .collect()
}

/// External key-value store the configuration text lives in, whatever shape
/// the surrounding environment provides for that.
pub trait KvStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// [`KvStore`] over a single JSON object file. Reads treat a missing or
/// unreadable file as empty; writes that fail are logged and dropped, the
/// engine keeps running on its in-memory state.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonFileStore {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HashMap<String, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return HashMap::new(),
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) {
        let mut map = self.load();
        map.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("could not create {}: {e}", parent.display());
                return;
            }
        }
        let body = match serde_json::to_string_pretty(&map) {
            Ok(body) => body,
            Err(e) => {
                warn!("could not serialize store: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, body) {
            warn!("could not write {}: {e}", self.path.display());
        }
    }
}

/// The one desired sequence shared by every pool, with an epoch that counts
/// user edits. Pools compare their stamp against the epoch to decide when
/// to reseed, so bumping it here invalidates all of them at once.
pub struct GlobalConfig {
    desired: Vec<TileCode>,
    text: String,
    epoch: u64,
    store: Option<Box<dyn KvStore>>,
}

impl GlobalConfig {
    pub fn new() -> GlobalConfig {
        GlobalConfig {
            desired: Vec::new(),
            text: String::new(),
            epoch: 0,
            store: None,
        }
    }

    /// Loads the persisted text at startup. The epoch starts at zero either
    /// way; pools pick the restored sequence up lazily on first contact.
    pub fn with_store(store: Box<dyn KvStore>) -> GlobalConfig {
        let text = store.get(STORAGE_KEY_TEXT).unwrap_or_default();
        GlobalConfig {
            desired: parse_desired(&text),
            text,
            epoch: 0,
            store: Some(store),
        }
    }

    pub fn desired(&self) -> &[TileCode] {
        &self.desired
    }

    /// The raw text as last applied, before normalization.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The apply action: adopt the text, bump the epoch, persist the raw
    /// form so the user gets back exactly what they typed.
    pub fn apply(&mut self, text: &str) {
        self.desired = parse_desired(text);
        self.text = text.to_string();
        self.epoch += 1;
        self.persist();
    }

    /// The clear action: adopt the empty sequence and bump the epoch, which
    /// flushes every pool's pending queue on its next contact.
    pub fn clear(&mut self) {
        self.apply("");
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            store.set(STORAGE_KEY_TEXT, &self.text);
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> GlobalConfig {
        GlobalConfig::new()
    }
}
