//! JSON file store

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Directory name used for both global and project configuration
const HARBOR_DIR: &str = "harbor";
const PROJECT_DIR: &str = ".harbor";

/// JSON configuration store rooted at one directory
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Global store (`<config_dir>/harbor/`)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join(HARBOR_DIR);
        Ok(Self::new(dir))
    }

    /// Project store (`<root>/.harbor/`)
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(PROJECT_DIR))
    }

    /// Project store for the current directory
    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir)
                .map_err(|e| Error::Config(format!("Failed to create directory: {}", e)))?;
        }
        Ok(())
    }

    /// Raw JSON value of a file
    pub fn load_value(&self, filename: &str) -> Result<Value> {
        let path = self.file_path(filename);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Raw JSON value, `None` if the file does not exist
    pub fn load_value_optional(&self, filename: &str) -> Result<Option<Value>> {
        if !self.exists(filename) {
            return Ok(None);
        }
        self.load_value(filename).map(Some)
    }

    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        serde_json::from_value(self.load_value(filename)?)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn load_or_default<T: DeserializeOwned + Default>(&self, filename: &str) -> T {
        self.load(filename).unwrap_or_default()
    }

    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        if !self.exists(filename) {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }

    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(filename);
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Config(format!("Failed to serialize: {}", e)))?;
        std::fs::write(&path, content)
            .map_err(|e| Error::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).exists()
    }
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else
/// in the overlay replaces the base value.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("nested"));

        store.save("a.json", &json!({"x": 1})).unwrap();
        assert!(store.exists("a.json"));

        let value: Value = store.load("a.json").unwrap();
        assert_eq!(value["x"], 1);
        assert!(store.load_value_optional("missing.json").unwrap().is_none());
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let store = JsonStore::new(dir.path());
        let err = store.load_value("bad.json").unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_merge_json() {
        let mut base = json!({"security": {"mode": "moderate", "maxCpus": 4}, "registry": {"maxResources": 32}});
        merge_json(
            &mut base,
            json!({"security": {"mode": "strict"}, "health": {"enabled": false}}),
        );
        assert_eq!(base["security"]["mode"], "strict");
        assert_eq!(base["security"]["maxCpus"], 4);
        assert_eq!(base["registry"]["maxResources"], 32);
        assert_eq!(base["health"]["enabled"], false);
    }
}
