// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single-use byte sources and the assets that open them.

use std::io::Cursor;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use belegwerk_core::error::{BelegError, Result};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// One readable view of an asset. Consumed by the upload that receives it
/// and released when dropped.
pub enum ByteSource {
    /// Streamed read.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// A file uploaded whole.
    File(PathBuf),
}

impl ByteSource {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Read the whole source into memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Stream(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(buf)
            }
            Self::File(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("ByteSource::Stream"),
            Self::File(path) => write!(f, "ByteSource::File({})", path.display()),
        }
    }
}

/// Something a save can open fresh byte sources from, as often as needed.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Open a new byte source. Fails with `StreamUnavailable` when the asset
    /// can no longer be read.
    async fn open(&self) -> Result<ByteSource>;

    /// Whole asset in memory.
    async fn read_all(&self) -> Result<Vec<u8>>;

    fn describe(&self) -> String;
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// -- In-memory asset ----------------------------------------------------------

/// Stream wrapper that counts itself closed when dropped.
struct TrackedStream<R> {
    inner: R,
    closed: Arc<AtomicUsize>,
}

impl<R: AsyncRead + Unpin> AsyncRead for TrackedStream<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R> Drop for TrackedStream<R> {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stream-backed asset over an in-memory JPEG, typically the output of the
/// capture pipeline. Counts how many streams were opened and closed.
pub struct MemoryAsset {
    bytes: Arc<Vec<u8>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    unavailable: AtomicBool,
}

impl MemoryAsset {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Make every later `open`/`read_all` fail.
    pub fn revoke(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BelegError::StreamUnavailable("in-memory asset was revoked".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetSource for MemoryAsset {
    async fn open(&self) -> Result<ByteSource> {
        self.check_available()?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ByteSource::Stream(Box::new(TrackedStream {
            inner: Cursor::new(self.bytes.to_vec()),
            closed: Arc::clone(&self.closed),
        })))
    }

    async fn read_all(&self) -> Result<Vec<u8>> {
        self.check_available()?;
        Ok(self.bytes.to_vec())
    }

    fn describe(&self) -> String {
        format!("memory:{} bytes", self.bytes.len())
    }
}

// -- File asset ---------------------------------------------------------------

/// Asset on the local filesystem, uploaded as a whole file.
pub struct FileAsset {
    path: PathBuf,
}

impl FileAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AssetSource for FileAsset {
    async fn open(&self) -> Result<ByteSource> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(ByteSource::File(self.path.clone())),
            Ok(_) => Err(BelegError::StreamUnavailable(format!(
                "{} is not a file",
                self.path.display()
            ))),
            Err(err) => Err(BelegError::StreamUnavailable(format!(
                "{}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn read_all(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|err| BelegError::StreamUnavailable(format!("{}: {err}", self.path.display())))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
