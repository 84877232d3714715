//! Durable JSON documents with atomic replace-on-write.
//!
//! [`JsonDocument`] is the one place kiyomi touches JSON state on disk. Every
//! save writes a hidden temp file next to the target, fsyncs it, then renames
//! it over the target, so a crash mid-write leaves either the old or the new
//! content, never a truncated file.

use crate::error::{KiyomiError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A typed JSON document bound to one file path.
pub struct JsonDocument<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonDocument<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for JsonDocument<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonDocument")
            .field("path", &self.path)
            .finish()
    }
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file currently exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the document. A missing file yields `T::default()`.
    ///
    /// # Errors
    ///
    /// Returns [`KiyomiError::Store`] if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<T> {
        Ok(self.load_existing()?.unwrap_or_default())
    }

    /// Read the document, distinguishing "absent" from "present".
    ///
    /// # Errors
    ///
    /// Returns [`KiyomiError::Store`] if the file exists but cannot be read or parsed.
    pub fn load_existing(&self) -> Result<Option<T>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KiyomiError::Store(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            KiyomiError::Store(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    /// Read the document, logging and falling back to the default on error.
    pub fn load_or_default(&self) -> T {
        match self.load() {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), "{e}; using empty document");
                T::default()
            }
        }
    }

    /// Atomically replace the document on disk.
    ///
    /// # Errors
    ///
    /// Returns [`KiyomiError::Store`] if serialization or any filesystem step fails.
    pub fn save(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| KiyomiError::Store(format!("cannot serialize: {e}")))?;
        write_atomic(&self.path, json.as_bytes())
    }

    /// Load, mutate in place, then save. Returns whatever the closure returns.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures; on a load failure nothing is written.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut value = self.load()?;
        let out = f(&mut value);
        self.save(&value)?;
        Ok(out)
    }

    /// Delete the backing file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`KiyomiError::Store`] if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KiyomiError::Store(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// Write `bytes` to `path` via a temp file in the same directory and a rename.
///
/// # Errors
///
/// Returns [`KiyomiError::Store`] naming the step that failed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| {
        KiyomiError::Store(format!("cannot create dir {}: {e}", parent.display()))
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| KiyomiError::Store(format!("invalid path {}", path.display())))?;
    let tmp_path = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&tmp_path, bytes).map_err(|e| {
        KiyomiError::Store(format!(
            "failed to write temp file {}: {e}",
            tmp_path.display()
        ))
    })?;

    if let Ok(file) = std::fs::File::open(&tmp_path) {
        let _ = file.sync_all();
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        KiyomiError::Store(format!(
            "failed to rename temp file to {}: {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
        names: Vec<String>,
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let doc: JsonDocument<Counter> = JsonDocument::new(dir.path().join("c.json"));
        assert!(!doc.exists());
        assert_eq!(doc.load().unwrap(), Counter::default());
        assert!(doc.load_existing().unwrap().is_none());
    }

    #[test]
    fn update_persists_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let doc: JsonDocument<Counter> = JsonDocument::new(dir.path().join("sub").join("c.json"));

        let hits = doc
            .update(|c| {
                c.hits += 1;
                c.names.push("a".to_owned());
                c.hits
            })
            .unwrap();
        assert_eq!(hits, 1);
        doc.update(|c| c.hits += 1).unwrap();

        let loaded = doc.load().unwrap();
        assert_eq!(loaded.hits, 2);
        assert_eq!(loaded.names, vec!["a".to_owned()]);
        assert!(!dir.path().join("sub").join(".c.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_but_load_or_default_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{ not json").unwrap();
        let doc: JsonDocument<Counter> = JsonDocument::new(&path);

        assert!(matches!(doc.load(), Err(KiyomiError::Store(_))));
        assert_eq!(doc.load_or_default(), Counter::default());
        // A failed load must not clobber the file.
        assert!(doc.update(|c| c.hits = 9).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let doc: JsonDocument<Counter> = JsonDocument::new(dir.path().join("c.json"));
        doc.save(&Counter::default()).unwrap();
        assert!(doc.exists());
        doc.remove().unwrap();
        doc.remove().unwrap();
        assert!(!doc.exists());
    }
}
