//! Flat key-value backends.
//!
//! The [`KeyValueStore`] trait is the generic "get/set string and int by key"
//! surface the anchor store is written against. Writes may be buffered until
//! [`KeyValueStore::flush`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PrefsError;

/// A single stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Int(i64),
    String(String),
}

/// Generic string/int preferences API.
pub trait KeyValueStore {
    fn has_key(&self, key: &str) -> bool;

    /// `Ok(None)` when the key is absent.
    fn get_int(&self, key: &str) -> Result<Option<i64>, PrefsError>;

    fn set_int(&mut self, key: &str, value: i64);

    /// `Ok(None)` when the key is absent.
    fn get_string(&self, key: &str) -> Result<Option<String>, PrefsError>;

    fn set_string(&mut self, key: &str, value: &str);

    /// Returns whether the key existed.
    fn delete_key(&mut self, key: &str) -> bool;

    /// Every key currently held, in no particular order.
    fn keys(&self) -> Vec<String>;

    /// Raw value of any type, used to restore keys after a failed flush.
    fn get_value(&self, key: &str) -> Option<PrefValue>;

    fn set_value(&mut self, key: &str, value: PrefValue);

    /// Make buffered writes durable.
    fn flush(&mut self) -> Result<(), PrefsError>;
}

fn int_value(key: &str, value: Option<&PrefValue>) -> Result<Option<i64>, PrefsError> {
    match value {
        None => Ok(None),
        Some(PrefValue::Int(v)) => Ok(Some(*v)),
        Some(PrefValue::String(_)) => Err(PrefsError::TypeMismatch {
            key: key.to_string(),
            expected: "integer",
        }),
    }
}

fn string_value(key: &str, value: Option<&PrefValue>) -> Result<Option<String>, PrefsError> {
    match value {
        None => Ok(None),
        Some(PrefValue::String(v)) => Ok(Some(v.clone())),
        Some(PrefValue::Int(_)) => Err(PrefsError::TypeMismatch {
            key: key.to_string(),
            expected: "string",
        }),
    }
}

/// In-memory backend. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPrefs {
    values: HashMap<String, PrefValue>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemoryPrefs {
    fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, PrefsError> {
        int_value(key, self.values.get(key))
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.values.insert(key.to_string(), PrefValue::Int(value));
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, PrefsError> {
        string_value(key, self.values.get(key))
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.values
            .insert(key.to_string(), PrefValue::String(value.to_string()));
    }

    fn delete_key(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn get_value(&self, key: &str) -> Option<PrefValue> {
        self.values.get(key).cloned()
    }

    fn set_value(&mut self, key: &str, value: PrefValue) {
        self.values.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<(), PrefsError> {
        Ok(())
    }
}

/// JSON-file backend.
///
/// The whole file is read on open and rewritten on flush. The rewrite goes to
/// a temporary file in the same directory which is then renamed over the
/// target, so readers see either the old or the new contents.
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    values: BTreeMap<String, PrefValue>,
    dirty: bool,
}

impl FilePrefs {
    /// Open the file at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| PrefsError::Serialization {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(PrefsError::Io { path, source }),
        };
        tracing::debug!("Opened preferences file {} ({} keys)", path.display(), values.len());
        Ok(Self {
            path,
            values,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether there are writes not yet flushed to disk
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn io_error(&self, source: std::io::Error) -> PrefsError {
        PrefsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl KeyValueStore for FilePrefs {
    fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, PrefsError> {
        int_value(key, self.values.get(key))
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.values.insert(key.to_string(), PrefValue::Int(value));
        self.dirty = true;
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, PrefsError> {
        string_value(key, self.values.get(key))
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.values
            .insert(key.to_string(), PrefValue::String(value.to_string()));
        self.dirty = true;
    }

    fn delete_key(&mut self, key: &str) -> bool {
        let existed = self.values.remove(key).is_some();
        self.dirty |= existed;
        existed
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn get_value(&self, key: &str) -> Option<PrefValue> {
        self.values.get(key).cloned()
    }

    fn set_value(&mut self, key: &str, value: PrefValue) {
        self.values.insert(key.to_string(), value);
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<(), PrefsError> {
        if !self.dirty {
            return Ok(());
        }

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(&self.values).map_err(|source| {
            PrefsError::Serialization {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        self.dirty = false;
        tracing::trace!("Flushed {} keys to {}", self.values.len(), self.path.display());
        Ok(())
    }
}
