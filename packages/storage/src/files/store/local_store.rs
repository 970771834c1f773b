use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Filesystem backed store rooted at a single directory.
#[derive(Debug)]
pub struct LocalObjectStore {
    store: Arc<LocalFileSystem>,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| object_store::Error::Generic {
                store: "LocalFileSystem",
                source: Box::new(e),
            })?;
        }

        let store = LocalFileSystem::new_with_prefix(&root)?.with_automatic_cleanup(true);
        tracing::info!(root = %root.display(), "Opened local blob store");
        Ok(Self {
            store: Arc::new(store),
        })
    }

    pub fn inner(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn path_to_filesystem(&self, location: &Path) -> Result<PathBuf> {
        self.store.path_to_filesystem(location)
    }

    /// Creates the directory that will hold `location`.
    pub fn ensure_parent(&self, location: &Path) -> Result<()> {
        let path = self.store.path_to_filesystem(location)?;
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| object_store::Error::Generic {
                store: "LocalFileSystem",
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}
