// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collaborator seams of the save flow: object stores, the preset upload
// provider, the metadata store and save listeners.

use async_trait::async_trait;
use belegwerk_core::error::Result;
use belegwerk_core::{AssetRecord, ObjectLocation};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::source::ByteSource;

/// Stored object facts used to make re-uploads idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Lowercase hex SHA-256 of the stored bytes.
    pub sha256: String,
    pub len: u64,
}

/// A remote (or local) object store addressed by bucket and path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Upload from a byte source. Streams are read to the end; file sources
    /// are uploaded whole.
    async fn upload(&self, source: ByteSource, location: &ObjectLocation) -> Result<()>;

    /// Single-shot upload of an in-memory payload.
    async fn upload_bytes(&self, bytes: Vec<u8>, location: &ObjectLocation) -> Result<()>;

    /// Publicly resolvable URL of a stored object.
    async fn resolve_url(&self, location: &ObjectLocation) -> Result<String>;

    /// Digest and size of a stored object, `None` when absent.
    async fn head(&self, location: &ObjectLocation) -> Result<Option<ObjectInfo>>;
}

/// Raw answer of the preset provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct PresetUploadBody {
    secure_url: Option<String>,
    public_id: Option<String>,
}

/// URL and provider asset id pulled from a successful preset upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetUpload {
    pub url: String,
    pub asset_id: Option<String>,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `None` for a non-2xx status, an unparseable body or a body without
    /// `secure_url`.
    pub fn preset_upload(&self) -> Option<PresetUpload> {
        if !self.is_success() {
            return None;
        }
        let body: PresetUploadBody = serde_json::from_str(&self.body).ok()?;
        let url = body.secure_url.filter(|u| !u.is_empty())?;
        Some(PresetUpload {
            url,
            asset_id: body.public_id,
        })
    }
}

/// Unsigned, preset-based upload provider tried before the primary store.
#[async_trait]
pub trait PresetUploadProvider: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, folder: &str) -> Result<ProviderResponse>;
}

/// Document store with partial-update semantics.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Merge `fields` into `collection/document_id`, creating it if needed.
    /// Fields not named in `fields` are left as they are.
    async fn merge_set(&self, collection: &str, document_id: &str, fields: Map<String, Value>) -> Result<()>;
}

/// Notified once a record has been persisted.
pub trait SaveListener: Send + Sync {
    fn on_saved(&self, record: &AssetRecord);
}
