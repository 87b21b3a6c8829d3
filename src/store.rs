//! File content storage.
//!
//! Sessions read whole files on SELECT and write whole files at TRANS_END,
//! so the trait works on complete buffers and relative paths.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{PesitError, Result};

/// Storage backend for transferred content.
pub trait FileStore: Send + Sync {
    fn exists(&self, path: &Path) -> Result<bool>;

    fn read(&self, path: &Path) -> Result<Bytes>;

    /// Write `data` at `path`. With `overwrite` unset an existing file is an
    /// [`std::io::ErrorKind::AlreadyExists`] error.
    fn write(&self, path: &Path, data: &[u8], overwrite: bool) -> Result<()>;
}

/// Store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(PesitError::Io(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        format!("path escapes store root: {}", path.display()),
                    )))
                }
            }
        }
        Ok(resolved)
    }
}

impl FileStore for LocalFileStore {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        Ok(Bytes::from(std::fs::read(self.resolve(path)?)?))
    }

    fn write(&self, path: &Path, data: &[u8], overwrite: bool) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if overwrite {
            std::fs::write(&target, data)?;
        } else {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)?;
            file.write_all(data)?;
        }
        Ok(())
    }
}

/// Store kept in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<PathBuf, Bytes>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        self.files.lock().insert(path.into(), data.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Bytes> {
        self.files.lock().get(path.as_ref()).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl FileStore for MemoryFileStore {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        self.files.lock().get(path).cloned().ok_or_else(|| {
            PesitError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            ))
        })
    }

    fn write(&self, path: &Path, data: &[u8], overwrite: bool) -> Result<()> {
        let mut files = self.files.lock();
        if !overwrite && files.contains_key(path) {
            return Err(PesitError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file exists: {}", path.display()),
            )));
        }
        files.insert(path.to_path_buf(), Bytes::copy_from_slice(data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let path = Path::new("in/FILE.dat");

        assert!(!store.exists(path).unwrap());
        store.write(path, b"payload", false).unwrap();
        assert!(store.exists(path).unwrap());
        assert_eq!(&store.read(path).unwrap()[..], b"payload");
        assert!(dir.path().join("in").is_dir());
    }

    #[test]
    fn test_local_store_no_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let path = Path::new("FILE");
        store.write(path, b"one", false).unwrap();

        let err = store.write(path, b"two", false).unwrap_err();
        assert!(matches!(
            err,
            PesitError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists
        ));

        store.write(path, b"two", true).unwrap();
        assert_eq!(&store.read(path).unwrap()[..], b"two");
    }

    #[test]
    fn test_local_store_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        assert!(store.write(Path::new("../outside"), b"x", true).is_err());
        assert!(store.read(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryFileStore::new();
        store.insert("out/REPORT", Bytes::from_static(b"abc"));
        assert!(store.exists(Path::new("out/REPORT")).unwrap());
        assert!(store.read(Path::new("missing")).is_err());
        store.write(Path::new("in/X"), b"1", false).unwrap();
        assert!(store.write(Path::new("in/X"), b"2", false).is_err());
        assert_eq!(store.paths().len(), 2);
    }
}
