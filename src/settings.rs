// Runtime settings
// A flat string key/value store persisted as JSON in the user config dir.
// The update engine only reads the keys below, all optional.

use crate::error::StoreError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SETTINGS_FILE: &str = "settings.json";

pub mod keys {
    pub const PREVENT_SAVE_MOVE: &str = "prevent_save_move";
    pub const REMOVE_PREVIOUS_VERSION: &str = "remove_previous_version";
    pub const KEEP_ARCHIVE_COPY: &str = "keep_archive_copy";
    pub const ARCHIVE_DIRECTORY: &str = "archive_directory";
    pub const GAME_DIRECTORY: &str = "game_directory";
    pub const PLATFORM: &str = "platform";
    pub const GRAPHICS: &str = "graphics";
}

pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub struct JsonConfigStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonConfigStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let values = if path.exists() {
            let json = std::fs::read_to_string(path)?;
            serde_json::from_str(&json)?
        } else {
            BTreeMap::new()
        };

        crate::debug::log(&format!("Settings file: {:?}", path));
        Ok(Self {
            path: Some(path.to_path_buf()),
            values: Mutex::new(values),
        })
    }

    pub fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::config_dir()
            .ok_or(StoreError::NoConfigDir)?
            .join(crate::config::SETTINGS_DIR_NAME);
        std::fs::create_dir_all(&dir)?;
        Self::open(&dir.join(SETTINGS_FILE))
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        values.insert(key.to_string(), value.to_string());

        if let Some(path) = &self.path {
            std::fs::write(path, serde_json::to_string_pretty(&*values)?)?;
        }
        Ok(())
    }
}

pub fn get_bool(store: &dyn ConfigStore, key: &str, default: bool) -> bool {
    match store.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

pub fn get_path(store: &dyn ConfigStore, key: &str) -> Option<PathBuf> {
    store
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    X64,
    X86,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::X64 => "x64",
            Platform::X86 => "x86",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "x64" | "x86_64" | "amd64" => Some(Platform::X64),
            "x86" | "x32" | "i686" => Some(Platform::X86),
            _ => None,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        if cfg!(target_pointer_width = "64") {
            Platform::X64
        } else {
            Platform::X86
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Graphics {
    #[default]
    Tiles,
    Curses,
}

impl Graphics {
    pub fn as_str(&self) -> &'static str {
        match self {
            Graphics::Tiles => "tiles",
            Graphics::Curses => "curses",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tiles" => Some(Graphics::Tiles),
            "curses" | "terminal" => Some(Graphics::Curses),
            _ => None,
        }
    }
}

/// Preferences the update engine reads once per session.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub prevent_save_move: bool,
    pub remove_previous_version: bool,
    pub keep_archive_copy: bool,
    pub archive_directory: Option<PathBuf>,
    pub platform: Platform,
    pub graphics: Graphics,
    /// The launcher's own executable; left in place if it lives in the game directory.
    pub launcher_path: Option<PathBuf>,
    /// Where temporary downloads go; the user cache dir when unset.
    pub download_root: Option<PathBuf>,
}

impl UpdateOptions {
    pub fn from_store(store: &dyn ConfigStore) -> Self {
        Self {
            prevent_save_move: get_bool(store, keys::PREVENT_SAVE_MOVE, false),
            remove_previous_version: get_bool(store, keys::REMOVE_PREVIOUS_VERSION, false),
            keep_archive_copy: get_bool(store, keys::KEEP_ARCHIVE_COPY, false),
            archive_directory: get_path(store, keys::ARCHIVE_DIRECTORY),
            platform: store
                .get(keys::PLATFORM)
                .and_then(|v| Platform::parse(&v))
                .unwrap_or_default(),
            graphics: store
                .get(keys::GRAPHICS)
                .and_then(|v| Graphics::parse(&v))
                .unwrap_or_default(),
            launcher_path: std::env::current_exe().ok(),
            download_root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_store_is_empty() {
        let store = JsonConfigStore::in_memory();
        let options = UpdateOptions::from_store(&store);
        assert!(!options.prevent_save_move);
        assert!(!options.remove_previous_version);
        assert!(!options.keep_archive_copy);
        assert_eq!(options.archive_directory, None);
        assert_eq!(options.graphics, Graphics::Tiles);
    }

    #[test]
    fn parses_stored_values() {
        let store = JsonConfigStore::in_memory();
        store.set(keys::PREVENT_SAVE_MOVE, "True").unwrap();
        store.set(keys::KEEP_ARCHIVE_COPY, "1").unwrap();
        store.set(keys::ARCHIVE_DIRECTORY, "/tmp/archives").unwrap();
        store.set(keys::PLATFORM, "x86").unwrap();
        store.set(keys::REMOVE_PREVIOUS_VERSION, "maybe").unwrap();

        let options = UpdateOptions::from_store(&store);
        assert!(options.prevent_save_move);
        assert!(options.keep_archive_copy);
        assert!(!options.remove_previous_version);
        assert_eq!(options.archive_directory, Some(PathBuf::from("/tmp/archives")));
        assert_eq!(options.platform, Platform::X86);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        JsonConfigStore::open(&path)
            .unwrap()
            .set(keys::GAME_DIRECTORY, "/games/cdda")
            .unwrap();

        let store = JsonConfigStore::open(&path).unwrap();
        assert_eq!(get_path(&store, keys::GAME_DIRECTORY), Some(PathBuf::from("/games/cdda")));
    }
}
