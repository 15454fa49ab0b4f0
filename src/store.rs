use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::error::MirrorError;

/// Lazily produced payload handed to [`Storage::write_stream`].
pub type ChunkIter<'a> = dyn Iterator<Item = io::Result<Vec<u8>>> + 'a;

/// Key-addressed byte store. Keys are `/`-separated logical paths; backends
/// map them onto relative file paths or object names.
///
/// There is no write-mode open: all writes go through `write_stream`.
pub trait Storage: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool, MirrorError>;

    fn list(&self, prefix: &str) -> Result<Vec<String>, MirrorError>;

    /// Consumes `chunks` to exhaustion and stores them under `key`. An `Err`
    /// item aborts the write and nothing becomes visible under `key`.
    fn write_stream(&self, key: &str, chunks: &mut ChunkIter<'_>) -> Result<(), MirrorError>;

    fn open_read(&self, key: &str) -> Result<Box<dyn Read + Send>, MirrorError>;

    fn describe(&self) -> String;
}

pub fn write_bytes(storage: &dyn Storage, key: &str, content: &[u8]) -> Result<(), MirrorError> {
    let mut chunks = std::iter::once(Ok(content.to_vec()));
    storage.write_stream(key, &mut chunks)
}

pub fn read_bytes(storage: &dyn Storage, key: &str) -> Result<Vec<u8>, MirrorError> {
    let mut reader = storage.open_read(key)?;
    let mut content = Vec::new();
    reader
        .read_to_end(&mut content)
        .map_err(|err| MirrorError::Storage(format!("read {key}: {err}")))?;
    Ok(content)
}

/// Directory-rooted backend.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: Utf8PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, MirrorError> {
        let root = root.into();
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| MirrorError::Storage(format!("create {root}: {err}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<Utf8PathBuf, MirrorError> {
        let relative = Utf8Path::new(key);
        let is_enclosed = relative
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)));
        if key.is_empty() || !is_enclosed {
            return Err(MirrorError::Storage(format!("key escapes store root: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for LocalStore {
    fn exists(&self, key: &str) -> Result<bool, MirrorError> {
        Ok(self.path_for(key)?.as_std_path().exists())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, MirrorError> {
        let mut keys = Vec::new();
        for path in walk_files(self.root.as_std_path())? {
            let Ok(relative) = path.strip_prefix(self.root.as_std_path()) else {
                continue;
            };
            let Some(relative) = relative.to_str() else {
                continue;
            };
            let key = relative.replace(std::path::MAIN_SEPARATOR, "/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn write_stream(&self, key: &str, chunks: &mut ChunkIter<'_>) -> Result<(), MirrorError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| MirrorError::Storage(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MirrorError::Storage(format!("create {parent}: {err}")))?;

        let mut temp = Builder::new()
            .prefix(".icon-mirror")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MirrorError::Storage(err.to_string()))?;
        for chunk in chunks {
            let chunk = chunk.map_err(|err| MirrorError::Storage(format!("stream {key}: {err}")))?;
            if chunk.is_empty() {
                continue;
            }
            temp.write_all(&chunk)
                .map_err(|err| MirrorError::Storage(format!("write {path}: {err}")))?;
        }
        temp.flush()
            .map_err(|err| MirrorError::Storage(format!("flush {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| MirrorError::Storage(format!("persist {path}: {err}")))?;
        Ok(())
    }

    fn open_read(&self, key: &str) -> Result<Box<dyn Read + Send>, MirrorError> {
        let path = self.path_for(key)?;
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| MirrorError::Storage(format!("open {path}: {err}")))?;
        Ok(Box::new(file))
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.root)
    }
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, MirrorError> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| MirrorError::Storage(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| MirrorError::Storage(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_components() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = LocalStore::new(root).unwrap();
        assert!(store.path_for("../outside").is_err());
        assert!(store.path_for("/etc/passwd").is_err());
        assert!(store.path_for("icon-d2/metadata.json").is_ok());
    }
}
