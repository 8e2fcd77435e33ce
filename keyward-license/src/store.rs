//! Persistence for offline license and machine files.
//!
//! The core never assumes a storage medium. [`FileStore`] keeps files on
//! disk under a root directory; [`MemoryStore`] keeps them in memory.

use crate::error::{LicenseError, LicenseResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Loads and saves raw file bytes.
pub trait Store: Send + Sync {
    /// Loads the bytes at `path`.
    fn load(&self, path: &Path) -> LicenseResult<Vec<u8>>;

    /// Saves `bytes` at `path`, replacing any previous content.
    fn save(&self, path: &Path, bytes: &[u8]) -> LicenseResult<()>;
}

/// Stores files on the local filesystem.
///
/// Relative paths are resolved against the store's root.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Creates a store rooted at the platform data directory for `app`.
    pub fn for_app(app: &str) -> Self {
        Self::new(Self::default_root(app))
    }

    /// Returns the platform data directory for `app`, or `./<app>` when
    /// the platform has none.
    #[must_use]
    pub fn default_root(app: &str) -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app)
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Store for FileStore {
    fn load(&self, path: &Path) -> LicenseResult<Vec<u8>> {
        let path = self.resolve(path);
        std::fs::read(&path)
            .map_err(|e| LicenseError::Storage(format!("{}: {e}", path.display())))
    }

    fn save(&self, path: &Path, bytes: &[u8]) -> LicenseResult<()> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LicenseError::Storage(e.to_string()))?;
        }
        std::fs::write(&path, bytes)
            .map_err(|e| LicenseError::Storage(format!("{}: {e}", path.display())))
    }
}

/// Stores files in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load(&self, path: &Path) -> LicenseResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| LicenseError::Storage(format!("{}: not found", path.display())))
    }

    fn save(&self, path: &Path, bytes: &[u8]) -> LicenseResult<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }
}
