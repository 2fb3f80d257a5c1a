use crate::error::RagError;
use crate::index::VectorIndex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::warn;

/// Owned handle to the current index snapshot and its backing file.
///
/// Readers clone the snapshot `Arc` and never wait on a writer. Writers are
/// serialized by [`IndexStore::lock_writer`], build a new index off to the
/// side, persist it, then [`IndexStore::publish`] it in one swap.
#[derive(Debug)]
pub struct IndexStore {
    current: RwLock<Arc<VectorIndex>>,
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

pub struct WriteGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl IndexStore {
    /// Index that lives only in memory; nothing is persisted.
    pub fn in_memory() -> Self {
        Self::from_index(VectorIndex::new(), None)
    }

    pub fn from_index(index: VectorIndex, path: Option<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
            path,
        }
    }

    /// Opens the index persisted at `path`. A missing or unreadable file
    /// yields an empty index bound to the same path.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let index = match VectorIndex::load(&path) {
            Ok(index) => index,
            Err(error) => {
                if path.exists() {
                    warn!(path = %path.display(), %error, "discarding unreadable index");
                }
                VectorIndex::new()
            }
        };
        Self::from_index(index, Some(path))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> Arc<VectorIndex> {
        self.current.read().await.clone()
    }

    pub async fn lock_writer(&self) -> WriteGuard<'_> {
        WriteGuard {
            _guard: self.writer.lock().await,
        }
    }

    /// Persists `index` (when the store has a path) and makes it current.
    /// On a persistence failure the previous snapshot stays current.
    pub async fn publish(&self, _writer: &WriteGuard<'_>, index: VectorIndex) -> Result<(), RagError> {
        let index = Arc::new(index);

        if let Some(path) = self.path.clone() {
            let to_save = Arc::clone(&index);
            tokio::task::spawn_blocking(move || to_save.save(&path))
                .await
                .map_err(|error| RagError::IndexPersist(error.to_string()))??;
        }

        *self.current.write().await = index;
        Ok(())
    }

    /// Drops every entry and deletes the backing file.
    pub async fn clear(&self, _writer: &WriteGuard<'_>) -> Result<(), RagError> {
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(RagError::IndexPersist(format!("{}: {error}", path.display())))
                }
            }
        }

        *self.current.write().await = Arc::new(VectorIndex::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use tempfile::tempdir;

    fn entry(text: &str) -> (Chunk, Vec<f32>) {
        (
            Chunk {
                chunk_id: text.to_string(),
                source: "notes.txt".to_string(),
                page: None,
                chunk_index: 0,
                char_start: 0,
                text: text.to_string(),
            },
            vec![1.0, 0.0],
        )
    }

    #[tokio::test]
    async fn published_index_is_persisted_and_reopened() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.json");
        let store = IndexStore::open(&path);
        assert!(store.snapshot().await.is_empty());

        let writer = store.lock_writer().await;
        let mut next = (*store.snapshot().await).clone();
        next.insert(vec![entry("hello")])?;
        store.publish(&writer, next).await?;
        drop(writer);

        assert_eq!(store.snapshot().await.len(), 1);
        let reopened = IndexStore::open(&path);
        assert_eq!(reopened.snapshot().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn earlier_snapshot_is_unaffected_by_publish() -> Result<(), RagError> {
        let store = IndexStore::in_memory();
        let before = store.snapshot().await;

        let writer = store.lock_writer().await;
        let mut next = (*before).clone();
        next.insert(vec![entry("hello")])?;
        store.publish(&writer, next).await?;

        assert!(before.is_empty());
        assert_eq!(store.snapshot().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_opens_as_empty_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"not json")?;

        let store = IndexStore::open(&path);
        assert!(store.snapshot().await.is_empty());
        assert_eq!(store.path(), Some(path.as_path()));
        Ok(())
    }

    #[tokio::test]
    async fn clear_removes_entries_and_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.json");
        let store = IndexStore::open(&path);

        let writer = store.lock_writer().await;
        let mut next = VectorIndex::new();
        next.insert(vec![entry("hello")])?;
        store.publish(&writer, next).await?;
        assert!(path.exists());

        store.clear(&writer).await?;
        assert!(!path.exists());
        assert!(store.snapshot().await.is_empty());
        Ok(())
    }
}
