use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, WriteMultipart};
use std::sync::Arc;

pub mod local_store;

use local_store::LocalObjectStore;

/// Number of in-flight part uploads tolerated before `put_stream` waits.
const MAX_CONCURRENT_PARTS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    Store(#[from] object_store::Error),
    #[error("Upload stream error: {0}")]
    Body(String),
}

/// Bytes of a stored blob, ready to be forwarded to a client.
pub struct BlobRead {
    pub size: u64,
    pub stream: BoxStream<'static, object_store::Result<Bytes>>,
}

#[derive(Clone, Debug)]
pub enum RunStore {
    Local(Arc<LocalObjectStore>),
    Memory(Arc<object_store::memory::InMemory>),
}

impl RunStore {
    pub fn local(root: impl Into<std::path::PathBuf>) -> Result<Self, StorageError> {
        Ok(RunStore::Local(Arc::new(LocalObjectStore::new(root.into())?)))
    }

    pub fn memory() -> Self {
        RunStore::Memory(Arc::new(object_store::memory::InMemory::new()))
    }

    pub fn as_generic(&self) -> Arc<dyn ObjectStore> {
        match self {
            RunStore::Local(store) => store.inner(),
            RunStore::Memory(store) => store.clone() as Arc<dyn ObjectStore>,
        }
    }

    /// Streams `body` into `location` and returns the number of bytes written.
    ///
    /// The upload only becomes visible once the stream has fully drained; a
    /// failing body aborts the upload and leaves no object behind.
    pub async fn put_stream<S, E>(&self, location: &Path, body: S) -> Result<u64, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: std::fmt::Display,
    {
        if let RunStore::Local(local) = self {
            local.ensure_parent(location)?;
        }

        let store = self.as_generic();
        let upload = store.put_multipart(location).await?;
        let mut writer = WriteMultipart::new(upload);
        let mut body = std::pin::pin!(body);
        let mut size: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(location = %location, "Upload stream aborted after {} bytes", size);
                    writer.abort().await?;
                    return Err(StorageError::Body(e.to_string()));
                }
            };

            size += chunk.len() as u64;
            if let Err(e) = writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await {
                writer.abort().await?;
                return Err(e.into());
            }
            writer.put(chunk);
        }

        writer.finish().await?;
        tracing::debug!(location = %location, size, "Stored blob");
        Ok(size)
    }

    /// Opens a blob for reading. A missing object is `Ok(None)`.
    pub async fn open(&self, location: &Path) -> Result<Option<BlobRead>, StorageError> {
        let store = self.as_generic();
        match store.get(location).await {
            Ok(result) => {
                let size = result.meta.size;
                let stream = result.into_stream();
                Ok(Some(BlobRead { size, stream }))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::keys::storage_location_for;
    use futures::TryStreamExt;

    fn body(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_put_and_read_memory() {
        let store = RunStore::memory();
        let location = storage_location_for("run1", "media/table.json");

        let size = store
            .put_stream(&location, body(&[&b"hello "[..], &b"world"[..]]))
            .await
            .unwrap();
        assert_eq!(size, 11);

        let blob = store.open(&location).await.unwrap().unwrap();
        assert_eq!(blob.size, 11);
        let chunks: Vec<Bytes> = blob.stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello world");
    }

    #[tokio::test]
    async fn test_open_missing_is_none() {
        let store = RunStore::memory();
        let location = storage_location_for("run1", "nope.txt");
        assert!(store.open(&location).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_store_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::local(dir.path()).unwrap();
        let location = storage_location_for("run1", "../../etc/passwd");

        store
            .put_stream(&location, body(&[&b"root:x:0:0"[..]]))
            .await
            .unwrap();

        let RunStore::Local(local) = &store else {
            panic!("expected a local store");
        };
        let on_disk = local.path_to_filesystem(&location).unwrap();
        let run_dir = dir.path().canonicalize().unwrap().join("runs").join("run1");
        assert!(on_disk.starts_with(&run_dir));
        assert_eq!(std::fs::read(on_disk).unwrap(), b"root:x:0:0");
    }

    #[tokio::test]
    async fn test_failed_body_leaves_nothing() {
        let store = RunStore::memory();
        let location = storage_location_for("run1", "partial.bin");
        let failing = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::other("client went away")),
        ]);

        let result = store.put_stream(&location, failing).await;
        assert!(matches!(result, Err(StorageError::Body(_))));
        assert!(store.open(&location).await.unwrap().is_none());
    }
}
