// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Object store on the local filesystem: one directory per bucket under a
// root, objects written via a temporary file and renamed into place.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use belegwerk_core::error::{BelegError, Result};
use belegwerk_core::ObjectLocation;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};

use crate::provider::{ObjectInfo, ObjectStore};
use crate::source::{ByteSource, sha256_hex};

pub struct LocalDirStore {
    root: PathBuf,
    create_buckets: bool,
}

impl LocalDirStore {
    /// Store rooted at `root`; bucket directories are created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            create_buckets: true,
        }
    }

    /// Uploads into a bucket whose directory is missing fail with
    /// not-found instead of creating it.
    pub fn existing_buckets_only(mut self) -> Self {
        self.create_buckets = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `location`.
    pub fn path_of(&self, location: &ObjectLocation) -> Result<PathBuf> {
        let bucket = checked_relative(&location.bucket)?;
        let object = checked_relative(&location.path)?;
        Ok(self.root.join(bucket).join(object))
    }

    async fn prepare(&self, location: &ObjectLocation) -> Result<PathBuf> {
        let target = self.path_of(location)?;
        let bucket_dir = self.root.join(&location.bucket);
        if !self.create_buckets && !tokio::fs::try_exists(&bucket_dir).await? {
            return Err(BelegError::ObjectNotFound(format!("bucket {} does not exist", location.bucket)));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(target)
    }

    /// Copy `reader` into `target` through a `.part` file renamed into place.
    /// The `.part` file is removed when any step fails.
    async fn write_atomic<R>(&self, target: &Path, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let tmp = target.with_extension("part");
        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let copied = tokio::io::copy(reader, &mut file).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, target).await?;
            Ok::<_, BelegError>(copied)
        }
        .await;
        if written.is_err() {
            if let Err(err) = tokio::fs::remove_file(&tmp).await {
                debug!(path = %tmp.display(), "partial file not removed: {err}");
            }
        }
        written
    }
}

/// Reject empty, absolute and parent-escaping paths.
fn checked_relative(raw: &str) -> Result<&Path> {
    let path = Path::new(raw);
    let ok = !raw.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(path)
    } else {
        Err(BelegError::UploadRejected {
            status: 400,
            detail: format!("invalid object path {raw:?}"),
        })
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    #[instrument(skip_all, fields(%location))]
    async fn upload(&self, source: ByteSource, location: &ObjectLocation) -> Result<()> {
        let target = self.prepare(location).await?;
        match source {
            ByteSource::Stream(mut reader) => {
                let copied = self.write_atomic(&target, &mut reader).await?;
                debug!(bytes = copied, "stream stored");
            }
            ByteSource::File(path) => {
                let bytes = tokio::fs::read(&path).await?;
                self.write_atomic(&target, &mut bytes.as_slice()).await?;
                debug!(bytes = bytes.len(), "file stored");
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(%location, len = bytes.len()))]
    async fn upload_bytes(&self, bytes: Vec<u8>, location: &ObjectLocation) -> Result<()> {
        let target = self.prepare(location).await?;
        self.write_atomic(&target, &mut bytes.as_slice()).await?;
        Ok(())
    }

    async fn resolve_url(&self, location: &ObjectLocation) -> Result<String> {
        let path = self.path_of(location)?;
        match tokio::fs::canonicalize(&path).await {
            Ok(abs) if abs.is_file() => Ok(format!("file://{}", abs.display())),
            Ok(_) => Err(BelegError::ObjectNotFound(location.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BelegError::ObjectNotFound(location.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn head(&self, location: &ObjectLocation) -> Result<Option<ObjectInfo>> {
        let path = self.path_of(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(ObjectInfo {
                sha256: sha256_hex(&bytes),
                len: bytes.len() as u64,
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_resolve_and_head() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        let loc = ObjectLocation::new("bucket", "receipts/u/1.jpg");
        store.upload_bytes(b"jpeg".to_vec(), &loc).await.unwrap();

        let url = store.resolve_url(&loc).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("receipts/u/1.jpg"));

        let info = store.head(&loc).await.unwrap().unwrap();
        assert_eq!(info.len, 4);
        assert_eq!(info.sha256, sha256_hex(b"jpeg"));
    }

    /// Yields a few bytes, then fails.
    struct BrokenReader {
        sent: bool,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.sent {
                return std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                )));
            }
            self.sent = true;
            buf.put_slice(b"partial");
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        let loc = ObjectLocation::new("bucket", "receipts/u/2.jpg");
        let source = ByteSource::Stream(Box::new(BrokenReader { sent: false }));

        assert!(store.upload(source, &loc).await.is_err());
        let target = store.path_of(&loc).unwrap();
        assert!(!target.exists());
        assert!(!target.with_extension("part").exists());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        let loc = ObjectLocation::new("bucket", "nope.jpg");
        assert!(store.resolve_url(&loc).await.unwrap_err().is_not_found());
        assert_eq!(store.head(&loc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn existing_buckets_only_rejects_unknown_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path()).existing_buckets_only();
        let err = store
            .upload_bytes(vec![1], &ObjectLocation::new("absent", "a.jpg"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let store = LocalDirStore::new("/tmp/x");
        assert!(store.path_of(&ObjectLocation::new("b", "../etc/passwd")).is_err());
        assert!(store.path_of(&ObjectLocation::new("b", "/abs.jpg")).is_err());
        assert!(store.path_of(&ObjectLocation::new("", "a.jpg")).is_err());
    }
}
