use crate::error::{NodeError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use splitvault_core::protocol::is_valid_blob_id;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

/// Flat directory of opaque blobs, one file per blob id.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, blob_id: &str) -> Result<PathBuf> {
        if !is_valid_blob_id(blob_id) {
            return Err(NodeError::InvalidBody);
        }
        Ok(self.root.join(blob_id))
    }

    /// Streams `body` into a temporary file and renames it over `blob_id`.
    /// Returns the number of bytes stored.
    pub async fn write<S>(&self, blob_id: &str, body: S) -> Result<u64>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        let final_path = self.blob_path(blob_id)?;
        // leading dot keeps temp files out of the valid id space
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", blob_id, Ulid::new()));

        match write_file(&temp_path, body).await {
            Ok(written) => {
                tokio::fs::rename(&temp_path, &final_path).await?;
                tracing::debug!("Stored blob: id={} bytes={}", blob_id, written);
                Ok(written)
            }
            Err(error) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(error)
            }
        }
    }

    pub async fn open_blob(&self, blob_id: &str) -> Result<File> {
        let path = self.blob_path(blob_id)?;
        match File::open(&path).await {
            Ok(file) => Ok(file),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(NodeError::NoSuchBlob)
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn delete(&self, blob_id: &str) -> Result<()> {
        let path = self.blob_path(blob_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted blob: id={}", blob_id);
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(NodeError::NoSuchBlob)
            }
            Err(error) => Err(error.into()),
        }
    }
}

async fn write_file<S>(path: &Path, mut body: S) -> Result<u64>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut file = File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::AsyncReadExt;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(*part)))
                .collect::<Vec<_>>(),
        )
    }

    async fn read_all(store: &BlobStore, blob_id: &str) -> Vec<u8> {
        let mut file = store.open_blob(blob_id).await.expect("open");
        let mut data = Vec::new();
        file.read_to_end(&mut data).await.expect("read");
        data
    }

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path().join("blobs")).await.expect("open");

        let written = store
            .write("part-1", chunks(&[b"hello ", b"world"]))
            .await
            .expect("write");
        assert_eq!(written, 11);
        assert_eq!(read_all(&store, "part-1").await, b"hello world");

        store
            .write("part-1", chunks(&[b"replaced"]))
            .await
            .expect("overwrite");
        assert_eq!(read_all(&store, "part-1").await, b"replaced");

        store.delete("part-1").await.expect("delete");
        assert!(matches!(
            store.open_blob("part-1").await,
            Err(NodeError::NoSuchBlob)
        ));
        assert!(matches!(
            store.delete("part-1").await,
            Err(NodeError::NoSuchBlob)
        ));
    }

    #[tokio::test]
    async fn ids_that_escape_the_directory_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path()).await.expect("open");

        assert!(matches!(
            store.write("../evil", chunks(&[b"x"])).await,
            Err(NodeError::InvalidBody)
        ));
        assert!(matches!(
            store.open_blob("").await,
            Err(NodeError::InvalidBody)
        ));
    }

    #[tokio::test]
    async fn interrupted_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path()).await.expect("open");

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "panel went away",
            )),
        ]);
        assert!(matches!(
            store.write("part-2", body).await,
            Err(NodeError::Io(_))
        ));
        assert!(matches!(
            store.open_blob("part-2").await,
            Err(NodeError::NoSuchBlob)
        ));

        let mut entries = tokio::fs::read_dir(store.root()).await.expect("read dir");
        assert!(entries.next_entry().await.expect("entry").is_none());
    }
}
