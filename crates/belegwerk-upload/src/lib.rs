// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Belegwerk Upload: persists a finished receipt image through a chain of
// fallback tiers, resolves its public reference with bounded backoff and
// writes the metadata record with merge semantics.

pub mod bucket;
pub mod coordinator;
pub mod fake;
pub mod local;
pub mod metadata;
pub mod provider;
pub mod retry;
pub mod source;

pub use bucket::BucketNaming;
pub use coordinator::{SaveOutcome, SaveReport, SaveRequest, Stage, UploadAttempt, UploadCoordinator};
pub use local::LocalDirStore;
pub use metadata::SqliteMetadataStore;
pub use provider::{
    MetadataStore, ObjectInfo, ObjectStore, PresetUpload, PresetUploadProvider, ProviderResponse, SaveListener,
};
pub use retry::{BackoffPolicy, RetryDecision, classify_error, should_retry};
pub use source::{AssetSource, ByteSource, FileAsset, MemoryAsset, sha256_hex};
