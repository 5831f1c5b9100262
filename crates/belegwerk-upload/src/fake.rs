// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory doubles of every save collaborator, with scripted failures and
// call counters. Used by the save-flow tests and benchmarks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use belegwerk_core::error::{BelegError, Result};
use belegwerk_core::{AssetRecord, ObjectLocation, ReceiptId};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::provider::{MetadataStore, ObjectInfo, ObjectStore, PresetUploadProvider, ProviderResponse, SaveListener};
use crate::source::{ByteSource, sha256_hex};

/// Failure a fake collaborator can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    NotFound,
    Transient,
    Permanent,
}

impl FakeFailure {
    fn to_error(self, location: &ObjectLocation) -> BelegError {
        match self {
            Self::NotFound => BelegError::ObjectNotFound(location.to_string()),
            Self::Transient => BelegError::Transport(format!("connection reset while talking to {}", location.bucket)),
            Self::Permanent => BelegError::UploadRejected {
                status: 403,
                detail: format!("permission denied for {location}"),
            },
        }
    }
}

/// Which upload entry point a call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Stream,
    File,
    Bytes,
}

// -- Object store -------------------------------------------------------------

/// Object store keeping objects in a map.
///
/// Scripted failures are consumed in order; `fail_all_*` applies after the
/// queue is empty.
pub struct FakeObjectStore {
    objects: Mutex<HashMap<ObjectLocation, Vec<u8>>>,
    upload_log: Mutex<Vec<(ObjectLocation, UploadKind)>>,
    upload_failures: Mutex<VecDeque<FakeFailure>>,
    upload_failure_always: Mutex<Option<FakeFailure>>,
    missing_buckets: Mutex<HashSet<String>>,
    resolve_failures: Mutex<VecDeque<FakeFailure>>,
    resolve_failure_always: Mutex<Option<FakeFailure>>,
    pub upload_calls: AtomicU64,
    pub resolve_calls: AtomicU64,
    pub head_calls: AtomicU64,
}

impl Default for FakeObjectStore {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            upload_log: Mutex::new(Vec::new()),
            upload_failures: Mutex::new(VecDeque::new()),
            upload_failure_always: Mutex::new(None),
            missing_buckets: Mutex::new(HashSet::new()),
            resolve_failures: Mutex::new(VecDeque::new()),
            resolve_failure_always: Mutex::new(None),
            upload_calls: AtomicU64::new(0),
            resolve_calls: AtomicU64::new(0),
            head_calls: AtomicU64::new(0),
        }
    }
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` uploads of any kind.
    pub async fn fail_next_uploads(&self, count: usize, failure: FakeFailure) {
        let mut queue = self.upload_failures.lock().await;
        queue.extend(std::iter::repeat_n(failure, count));
    }

    pub async fn fail_all_uploads(&self, failure: FakeFailure) {
        *self.upload_failure_always.lock().await = Some(failure);
    }

    /// Uploads into `bucket` fail with not-found, as for a bucket that does
    /// not exist.
    pub async fn remove_bucket(&self, bucket: impl Into<String>) {
        self.missing_buckets.lock().await.insert(bucket.into());
    }

    pub async fn fail_next_resolves(&self, count: usize, failure: FakeFailure) {
        let mut queue = self.resolve_failures.lock().await;
        queue.extend(std::iter::repeat_n(failure, count));
    }

    pub async fn fail_all_resolves(&self, failure: FakeFailure) {
        *self.resolve_failure_always.lock().await = Some(failure);
    }

    /// Place an object without going through `upload`.
    pub async fn put_object(&self, location: ObjectLocation, bytes: Vec<u8>) {
        self.objects.lock().await.insert(location, bytes);
    }

    pub async fn object(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        self.objects.lock().await.get(location).cloned()
    }

    pub async fn upload_log(&self) -> Vec<(ObjectLocation, UploadKind)> {
        self.upload_log.lock().await.clone()
    }

    pub async fn uploads_of(&self, kind: UploadKind) -> usize {
        self.upload_log.lock().await.iter().filter(|(_, k)| *k == kind).count()
    }

    pub async fn uploads_to_bucket(&self, bucket: &str) -> usize {
        self.upload_log
            .lock()
            .await
            .iter()
            .filter(|(location, _)| location.bucket == bucket)
            .count()
    }

    pub fn resolve_count(&self) -> u64 {
        self.resolve_calls.load(Ordering::Relaxed)
    }

    async fn scripted_upload_failure(&self, location: &ObjectLocation) -> Option<BelegError> {
        if let Some(failure) = self.upload_failures.lock().await.pop_front() {
            return Some(failure.to_error(location));
        }
        if let Some(failure) = *self.upload_failure_always.lock().await {
            return Some(failure.to_error(location));
        }
        if self.missing_buckets.lock().await.contains(&location.bucket) {
            return Some(BelegError::ObjectNotFound(format!("bucket {} does not exist", location.bucket)));
        }
        None
    }

    async fn store(&self, location: &ObjectLocation, kind: UploadKind, bytes: Vec<u8>) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        self.upload_log.lock().await.push((location.clone(), kind));
        if let Some(err) = self.scripted_upload_failure(location).await {
            return Err(err);
        }
        self.objects.lock().await.insert(location.clone(), bytes);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    fn backend_tag(&self) -> &'static str {
        "fake"
    }

    async fn upload(&self, source: ByteSource, location: &ObjectLocation) -> Result<()> {
        let kind = if source.is_stream() { UploadKind::Stream } else { UploadKind::File };
        let bytes = source.into_bytes().await?;
        self.store(location, kind, bytes).await
    }

    async fn upload_bytes(&self, bytes: Vec<u8>, location: &ObjectLocation) -> Result<()> {
        self.store(location, UploadKind::Bytes, bytes).await
    }

    async fn resolve_url(&self, location: &ObjectLocation) -> Result<String> {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(failure) = self.resolve_failures.lock().await.pop_front() {
            return Err(failure.to_error(location));
        }
        if let Some(failure) = *self.resolve_failure_always.lock().await {
            return Err(failure.to_error(location));
        }
        if self.objects.lock().await.contains_key(location) {
            Ok(format!("fake://{}/{}", location.bucket, location.path))
        } else {
            Err(BelegError::ObjectNotFound(location.to_string()))
        }
    }

    async fn head(&self, location: &ObjectLocation) -> Result<Option<ObjectInfo>> {
        self.head_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.objects.lock().await.get(location).map(|bytes| ObjectInfo {
            sha256: sha256_hex(bytes),
            len: bytes.len() as u64,
        }))
    }
}

// -- Preset provider ----------------------------------------------------------

/// Preset provider answering with a fixed response or transport error.
pub struct FakePresetProvider {
    response: Mutex<std::result::Result<ProviderResponse, String>>,
    folders: Mutex<Vec<String>>,
    pub calls: AtomicU64,
}

impl FakePresetProvider {
    /// Successful upload returning `url` and `asset_id`.
    pub fn succeeding(url: &str, asset_id: &str) -> Self {
        let body = serde_json::json!({ "secure_url": url, "public_id": asset_id }).to_string();
        Self::responding(ProviderResponse { status: 200, body })
    }

    pub fn responding(response: ProviderResponse) -> Self {
        Self {
            response: Mutex::new(Ok(response)),
            folders: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Every call fails with a transport error.
    pub fn failing(detail: impl Into<String>) -> Self {
        Self {
            response: Mutex::new(Err(detail.into())),
            folders: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub async fn folders(&self) -> Vec<String> {
        self.folders.lock().await.clone()
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PresetUploadProvider for FakePresetProvider {
    async fn upload(&self, _bytes: Vec<u8>, folder: &str) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.folders.lock().await.push(folder.to_string());
        self.response
            .lock()
            .await
            .clone()
            .map_err(BelegError::Transport)
    }
}

// -- Metadata store -----------------------------------------------------------

/// Document store over a map keyed by `(collection, document_id)`.
#[derive(Default)]
pub struct FakeMetadataStore {
    documents: Mutex<HashMap<(String, String), Map<String, Value>>>,
    fail: AtomicBool,
    pub merge_calls: AtomicU64,
}

impl FakeMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub async fn document(&self, collection: &str, document_id: &str) -> Option<Map<String, Value>> {
        self.documents
            .lock()
            .await
            .get(&(collection.to_string(), document_id.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.lock().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn merge_set(&self, collection: &str, document_id: &str, fields: Map<String, Value>) -> Result<()> {
        self.merge_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BelegError::Database("metadata store unavailable".into()));
        }
        let mut documents = self.documents.lock().await;
        let doc = documents
            .entry((collection.to_string(), document_id.to_string()))
            .or_default();
        belegwerk_core::merge_fields(doc, fields);
        Ok(())
    }
}

// -- Listener -----------------------------------------------------------------

/// Save listener recording which receipts it was told about.
#[derive(Default)]
pub struct RecordingListener {
    seen: std::sync::Mutex<Vec<ReceiptId>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<ReceiptId> {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl SaveListener for RecordingListener {
    fn on_saved(&self, record: &AssetRecord) {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.receipt_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let store = FakeObjectStore::new();
        let loc = ObjectLocation::new("b", "p.jpg");
        store.fail_next_uploads(1, FakeFailure::Transient).await;
        assert!(store.upload_bytes(vec![1], &loc).await.is_err());
        assert!(store.upload_bytes(vec![1], &loc).await.is_ok());
        assert_eq!(store.resolve_url(&loc).await.unwrap(), "fake://b/p.jpg");
        assert_eq!(store.uploads_of(UploadKind::Bytes).await, 2);
    }

    #[tokio::test]
    async fn missing_bucket_reports_not_found() {
        let store = FakeObjectStore::new();
        store.remove_bucket("gone").await;
        let err = store
            .upload_bytes(vec![1], &ObjectLocation::new("gone", "p.jpg"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn metadata_merges_documents() {
        let store = FakeMetadataStore::new();
        let mut first = Map::new();
        first.insert("a".into(), Value::from(1));
        let mut second = Map::new();
        second.insert("b".into(), Value::from(2));
        store.merge_set("c", "d", first).await.unwrap();
        store.merge_set("c", "d", second).await.unwrap();
        let doc = store.document("c", "d").await.unwrap();
        assert_eq!(doc.get("a"), Some(&Value::from(1)));
        assert_eq!(doc.get("b"), Some(&Value::from(2)));
    }
}
