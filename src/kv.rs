use std::{collections::HashMap, fs, io, path::PathBuf, sync::Arc};

use anyhow::Context;
use parking_lot::Mutex;
use rearch::CapsuleHandle;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::data_dir_capsule;

pub fn key_value_store_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn KeyValueStore> {
    let data_dir = get.as_ref(data_dir_capsule).clone();
    Arc::new(FileKeyValueStore::new(data_dir))
}

/// A persistence scope of named string blobs that are always read and written whole.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Stores each key as `<dir>/<key>.json`.
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    #[instrument(skip(self))]
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    #[instrument(skip(self, value))]
    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create data directory {}", self.dir.display()))?;
        let path = self.path_for(key);
        fs::write(&path, value).with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.items.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("persisted state under {key:?} is corrupt: {source}")]
pub struct CorruptState {
    pub key: String,
    #[source]
    pub source: serde_json::Error,
}

/// # Errors
/// Will return [`Err`] if `raw` is not a valid encoding of `T`.
pub fn decode_json<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CorruptState> {
    serde_json::from_str(raw).map_err(|source| CorruptState {
        key: key.to_owned(),
        source,
    })
}

/// Loads the blob at `key`, falling back to `T::default()` when it is absent or corrupt.
///
/// # Errors
/// Will return [`Err`] only if the underlying store fails to read.
pub fn load_json<T: DeserializeOwned + Default>(
    store: &dyn KeyValueStore,
    key: &str,
) -> anyhow::Result<T> {
    let Some(raw) = store.get_item(key)? else {
        return Ok(T::default());
    };
    Ok(decode_json(key, &raw).unwrap_or_else(|corrupt_state| {
        warn!(%corrupt_state, "Discarding corrupt persisted state");
        T::default()
    }))
}

/// # Errors
/// Will return [`Err`] if `value` fails to encode or the store fails to write.
pub fn store_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("Failed to encode {key}"))?;
    store.set_item(key, &raw)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_file_store_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path().to_owned());
        assert_eq!(store.get_item("urlMappings").unwrap(), None);
    }

    #[test]
    fn test_file_store_creates_dir_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("scope");
        let store = FileKeyValueStore::new(data_dir.clone());

        store.set_item("logs", "[]").unwrap();
        store.set_item("logs", "[1]").unwrap();

        assert_eq!(fs::read_to_string(data_dir.join("logs.json")).unwrap(), "[1]");
        let reopened = FileKeyValueStore::new(data_dir);
        assert_eq!(reopened.get_item("logs").unwrap().as_deref(), Some("[1]"));
    }

    #[test]
    fn test_file_store_read_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("logs.json")).unwrap();
        let store = FileKeyValueStore::new(dir.path().to_owned());
        assert!(store.get_item("logs").is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryKeyValueStore::default();
        assert_eq!(store.get_item("k").unwrap(), None);
        store.set_item("k", "v").unwrap();
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_load_json_defaults_when_absent() {
        let store = MemoryKeyValueStore::default();
        let loaded: Vec<u32> = load_json(&store, "nums").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_json_defaults_when_corrupt() {
        let store = MemoryKeyValueStore::default();
        store.set_item("table", "{not json").unwrap();
        let loaded: BTreeMap<String, u32> = load_json(&store, "table").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_decode_json_reports_corrupt_key() {
        let err = decode_json::<Vec<u32>>("logs", r#"{"a": 1}"#).unwrap_err();
        assert_eq!(err.key, "logs");
        assert!(err.to_string().starts_with("persisted state under \"logs\" is corrupt"));
    }

    #[test]
    fn test_store_then_load_json() {
        let store = MemoryKeyValueStore::default();
        let value = BTreeMap::from([("a".to_owned(), 1_u32), ("b".to_owned(), 2)]);
        store_json(&store, "table", &value).unwrap();
        let loaded: BTreeMap<String, u32> = load_json(&store, "table").unwrap();
        assert_eq!(loaded, value);
    }
}
