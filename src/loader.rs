//! Where shader sources and image files come from.

use std::path::{Path, PathBuf};

use crate::error::LoadError;

/// Reads named resources fully into memory.
///
/// Implementations must be callable from any thread. Failures are ordinary
/// outcomes: the caches turn them into sentinel entries.
pub trait ResourceLoader: Send + Sync {
    /// Reads the resource `path` within `namespace`.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotFound`] if nothing exists under the key,
    /// [`LoadError::Io`] if reading fails.
    fn open(&self, namespace: &str, path: &str) -> Result<Vec<u8>, LoadError>;
}

/// Resolves `(namespace, path)` to `root/namespace/path` on disk.
#[derive(Clone, Debug)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    /// A loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file a key resolves to.
    #[must_use]
    pub fn resolve(&self, namespace: &str, path: &str) -> PathBuf {
        self.root.join(namespace).join(path)
    }
}

impl ResourceLoader for DirectoryLoader {
    fn open(&self, namespace: &str, path: &str) -> Result<Vec<u8>, LoadError> {
        let file = self.resolve(namespace, path);
        std::fs::read(&file).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound {
                    namespace: namespace.to_owned(),
                    path: path.to_owned(),
                }
            } else {
                LoadError::Io { file, source }
            }
        })
    }
}
