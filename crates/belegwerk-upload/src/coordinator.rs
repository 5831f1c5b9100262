// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Upload coordinator: one state machine per save call, walking the fallback
// tiers (secondary provider, primary upload, reference resolution, re-upload,
// alternate bucket, whole payload) and persisting the record at the end.
//
// Every tier opens its own byte source; a source is dropped (and so closed)
// before the state machine moves on. At most one alternate-bucket upload, one
// whole-payload upload and one re-upload happen per save.
//
// Dropping the future returned by `save` stops the machine at its next await
// point. A provider call that was already accepted remotely may still land.

use std::sync::Arc;
use std::time::{Duration, Instant};

use belegwerk_core::error::BelegError;
use belegwerk_core::{
    AssetRecord, CooldownCache, ObjectLocation, ReceiptId, ReceiptMetadata, StructuredReceipt,
    UploadConfig, UploadErrorClass, UploadTier,
};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::bucket::BucketNaming;
use crate::provider::{MetadataStore, ObjectStore, PresetUploadProvider, SaveListener};
use crate::retry::{BackoffPolicy, RetryDecision, classify_error, should_retry};
use crate::source::{AssetSource, sha256_hex};

/// What to save, besides the image bytes.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub receipt_id: ReceiptId,
    pub owner_id: String,
    pub receipt: StructuredReceipt,
    pub raw_text: Option<String>,
}

/// One reference-resolution attempt against an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAttempt {
    pub location: ObjectLocation,
    /// Tier whose upload is being resolved.
    pub tier: UploadTier,
    /// 1-based attempt number within the current round.
    pub attempt: u32,
    /// Backoff waited before this attempt.
    pub delay: Duration,
}

/// Stages a save went through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Secondary,
    Primary { stream: bool },
    Resolve { tier: UploadTier, attempt: u32 },
    Reupload { skipped: bool },
    AlternateBucket { bucket: String },
    WholePayload,
    Persist,
}

/// Trace of a save call, returned on success and failure alike.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    pub stages: Vec<Stage>,
    /// Backoff delays slept before resolution attempts, in order.
    pub backoff: Vec<Duration>,
}

impl SaveReport {
    pub fn count(&self, pred: impl Fn(&Stage) -> bool) -> usize {
        self.stages.iter().filter(|s| pred(s)).count()
    }
}

/// Result of [`UploadCoordinator::save`].
#[derive(Debug)]
pub struct SaveOutcome {
    pub result: Result<AssetRecord, BelegError>,
    pub report: SaveReport,
}

impl SaveOutcome {
    pub fn into_result(self) -> Result<AssetRecord, BelegError> {
        self.result
    }
}

enum SaveState {
    Idle,
    TrySecondary,
    TryPrimary,
    ResolveReference(UploadAttempt),
    RetryWholeUpload {
        location: ObjectLocation,
        tier: UploadTier,
        last_error: BelegError,
        attempts: u32,
    },
    TryAlternateBucket {
        bucket: String,
    },
    WholePayloadUpload,
    Persist {
        image_url: Option<String>,
        secondary_asset_id: Option<String>,
    },
    Succeeded(AssetRecord),
    Failed(BelegError),
}

struct SaveContext<'a> {
    request: &'a SaveRequest,
    asset: &'a dyn AssetSource,
    primary: ObjectLocation,
    alternate_attempted: bool,
    whole_payload_attempted: bool,
    reupload_attempted: bool,
    report: SaveReport,
}

/// Persists finished receipt images and their records.
///
/// Owned by the composition root; every collaborator is injected.
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    secondary: Option<Arc<dyn PresetUploadProvider>>,
    listener: Option<(Arc<dyn SaveListener>, Arc<CooldownCache<ReceiptId>>)>,
    config: UploadConfig,
    policy: BackoffPolicy,
    naming: BucketNaming,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, metadata: Arc<dyn MetadataStore>, config: UploadConfig) -> Self {
        Self {
            store,
            metadata,
            secondary: None,
            listener: None,
            policy: BackoffPolicy::from(&config),
            naming: BucketNaming::from(&config),
            config,
        }
    }

    /// Try `provider` before the primary store.
    pub fn with_secondary(mut self, provider: Arc<dyn PresetUploadProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    /// Notify `listener` after each persisted record, at most once per receipt
    /// per cooldown window.
    pub fn with_listener(mut self, listener: Arc<dyn SaveListener>, cooldown: Arc<CooldownCache<ReceiptId>>) -> Self {
        self.listener = Some((listener, cooldown));
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Where the primary upload of `request` goes.
    pub fn primary_location(&self, request: &SaveRequest) -> ObjectLocation {
        let bucket = self
            .naming
            .preferred(&self.config.bucket, self.config.prefer_legacy_bucket);
        ObjectLocation::for_receipt(bucket, &request.owner_id, request.receipt_id)
    }

    /// Folder handed to the secondary provider.
    pub fn secondary_folder(&self, request: &SaveRequest) -> String {
        let root = self
            .config
            .secondary
            .as_ref()
            .and_then(|s| s.folder_root.as_deref())
            .map(|r| r.trim_matches('/'))
            .filter(|r| !r.is_empty());
        match root {
            Some(root) => format!("{root}/{}/{}", request.owner_id, request.receipt_id),
            None => format!("{}/{}", request.owner_id, request.receipt_id),
        }
    }

    /// Run the save state machine to completion.
    #[instrument(skip_all, fields(receipt = %request.receipt_id, owner = %request.owner_id, asset = %asset.describe()))]
    pub async fn save(&self, request: &SaveRequest, asset: &dyn AssetSource) -> SaveOutcome {
        let mut ctx = SaveContext {
            request,
            asset,
            primary: self.primary_location(request),
            alternate_attempted: false,
            whole_payload_attempted: false,
            reupload_attempted: false,
            report: SaveReport::default(),
        };
        info!(location = %ctx.primary, "save started");

        let mut state = SaveState::Idle;
        loop {
            state = match state {
                SaveState::Succeeded(record) => {
                    info!(stages = ctx.report.stages.len(), "save succeeded");
                    return SaveOutcome {
                        result: Ok(record),
                        report: ctx.report,
                    };
                }
                SaveState::Failed(err) => {
                    warn!(stages = ctx.report.stages.len(), "save failed: {err}");
                    return SaveOutcome {
                        result: Err(err),
                        report: ctx.report,
                    };
                }
                other => self.step(other, &mut ctx).await,
            };
        }
    }

    /// The single transition function.
    async fn step(&self, state: SaveState, ctx: &mut SaveContext<'_>) -> SaveState {
        match state {
            SaveState::Idle => {
                if self.secondary.is_some() {
                    SaveState::TrySecondary
                } else {
                    SaveState::TryPrimary
                }
            }
            SaveState::TrySecondary => self.try_secondary(ctx).await,
            SaveState::TryPrimary => self.try_primary(ctx).await,
            SaveState::ResolveReference(attempt) => self.resolve_reference(attempt, ctx).await,
            SaveState::RetryWholeUpload {
                location,
                tier,
                last_error,
                attempts,
            } => self.retry_whole_upload(location, tier, last_error, attempts, ctx).await,
            SaveState::TryAlternateBucket { bucket } => self.try_alternate_bucket(bucket, ctx).await,
            SaveState::WholePayloadUpload => self.whole_payload_upload(ctx).await,
            SaveState::Persist {
                image_url,
                secondary_asset_id,
            } => self.persist(image_url, secondary_asset_id, ctx).await,
            terminal @ (SaveState::Succeeded(_) | SaveState::Failed(_)) => terminal,
        }
    }

    // -- Tiers ----------------------------------------------------------------

    async fn try_secondary(&self, ctx: &mut SaveContext<'_>) -> SaveState {
        ctx.report.stages.push(Stage::Secondary);
        let Some(provider) = &self.secondary else {
            return SaveState::TryPrimary;
        };
        let bytes = match ctx.asset.read_all().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("secondary provider skipped, asset unreadable: {err}");
                return SaveState::TryPrimary;
            }
        };
        let folder = self.secondary_folder(ctx.request);
        match provider.upload(bytes, &folder).await {
            Ok(response) => match response.preset_upload() {
                Some(upload) => {
                    info!(url = %upload.url, "stored by secondary provider");
                    SaveState::Persist {
                        image_url: Some(upload.url),
                        secondary_asset_id: upload.asset_id,
                    }
                }
                None => {
                    warn!(status = response.status, "secondary provider gave no usable URL, falling back to primary");
                    SaveState::TryPrimary
                }
            },
            Err(err) => {
                warn!("secondary provider failed, falling back to primary: {err}");
                SaveState::TryPrimary
            }
        }
    }

    async fn try_primary(&self, ctx: &mut SaveContext<'_>) -> SaveState {
        let source = match ctx.asset.open().await {
            Ok(source) => source,
            Err(err) => return SaveState::Failed(stream_unavailable(err)),
        };
        ctx.report.stages.push(Stage::Primary {
            stream: source.is_stream(),
        });
        match self.store.upload(source, &ctx.primary).await {
            Ok(()) => SaveState::ResolveReference(first_attempt(ctx.primary.clone(), UploadTier::Primary)),
            Err(err) => {
                warn!(location = %ctx.primary, "primary upload failed: {err}");
                self.after_upload_failure(err, ctx)
            }
        }
    }

    async fn try_alternate_bucket(&self, bucket: String, ctx: &mut SaveContext<'_>) -> SaveState {
        ctx.alternate_attempted = true;
        ctx.report.stages.push(Stage::AlternateBucket {
            bucket: bucket.clone(),
        });
        let location = ctx.primary.with_bucket(bucket);
        let source = match ctx.asset.open().await {
            Ok(source) => source,
            Err(err) => return SaveState::Failed(stream_unavailable(err)),
        };
        match self.store.upload(source, &location).await {
            Ok(()) => SaveState::ResolveReference(first_attempt(location, UploadTier::AlternateBucket)),
            Err(err) => {
                warn!(%location, "alternate bucket upload failed: {err}");
                self.after_upload_failure(err, ctx)
            }
        }
    }

    async fn whole_payload_upload(&self, ctx: &mut SaveContext<'_>) -> SaveState {
        ctx.whole_payload_attempted = true;
        ctx.report.stages.push(Stage::WholePayload);
        let bytes = match ctx.asset.read_all().await {
            Ok(bytes) => bytes,
            Err(err) => return SaveState::Failed(stream_unavailable(err)),
        };
        debug!(bytes = bytes.len(), "single-shot upload");
        match self.store.upload_bytes(bytes, &ctx.primary).await {
            Ok(()) => SaveState::ResolveReference(first_attempt(ctx.primary.clone(), UploadTier::WholePayload)),
            Err(err) => {
                warn!("whole-payload upload failed: {err}");
                self.after_upload_failure(err, ctx)
            }
        }
    }

    /// Next tier after an upload (not a resolution) failed.
    fn after_upload_failure(&self, err: BelegError, ctx: &SaveContext<'_>) -> SaveState {
        if classify_error(&err) == UploadErrorClass::NotFound && !ctx.alternate_attempted {
            if let Some(bucket) = self.naming.alternate(&ctx.primary.bucket) {
                return SaveState::TryAlternateBucket { bucket };
            }
        }
        if !ctx.whole_payload_attempted {
            return SaveState::WholePayloadUpload;
        }
        SaveState::Failed(err)
    }

    // -- Resolution -----------------------------------------------------------

    async fn resolve_reference(&self, attempt: UploadAttempt, ctx: &mut SaveContext<'_>) -> SaveState {
        if !attempt.delay.is_zero() {
            ctx.report.backoff.push(attempt.delay);
            tokio::time::sleep(attempt.delay).await;
        }
        ctx.report.stages.push(Stage::Resolve {
            tier: attempt.tier,
            attempt: attempt.attempt,
        });

        let err = match self.store.resolve_url(&attempt.location).await {
            Ok(url) => {
                debug!(attempt = attempt.attempt, "reference resolved");
                return SaveState::Persist {
                    image_url: Some(url),
                    secondary_asset_id: None,
                };
            }
            Err(err) => err,
        };
        debug!(attempt = attempt.attempt, "resolution failed: {err}");

        match should_retry(&err, attempt.attempt, &self.policy) {
            RetryDecision::RetryAfter(delay) => SaveState::ResolveReference(UploadAttempt {
                attempt: attempt.attempt + 1,
                delay,
                ..attempt
            }),
            RetryDecision::Exhausted if !ctx.reupload_attempted => {
                SaveState::RetryWholeUpload {
                    location: attempt.location,
                    tier: attempt.tier,
                    last_error: err,
                    attempts: attempt.attempt,
                }
            }
            RetryDecision::Exhausted => {
                SaveState::Failed(BelegError::ReferenceResolutionTimeout {
                    attempts: attempt.attempt,
                    last_error: err.to_string(),
                })
            }
        }
    }

    /// One more upload of the same bytes to the same location, skipped when
    /// the store already holds exactly those bytes.
    async fn retry_whole_upload(
        &self,
        location: ObjectLocation,
        tier: UploadTier,
        last_error: BelegError,
        attempts: u32,
        ctx: &mut SaveContext<'_>,
    ) -> SaveState {
        ctx.reupload_attempted = true;
        warn!(%location, ?tier, attempts, "reference not resolvable, re-uploading: {last_error}");

        if self.config.verify_before_reupload && self.stored_copy_matches(&location, ctx).await {
            info!(%location, "stored object already matches payload; re-upload skipped");
            ctx.report.stages.push(Stage::Reupload { skipped: true });
            return SaveState::ResolveReference(first_attempt(location, UploadTier::Reupload));
        }

        ctx.report.stages.push(Stage::Reupload { skipped: false });
        let source = match ctx.asset.open().await {
            Ok(source) => source,
            Err(err) => return SaveState::Failed(stream_unavailable(err)),
        };
        match self.store.upload(source, &location).await {
            Ok(()) => SaveState::ResolveReference(first_attempt(location, UploadTier::Reupload)),
            Err(err) => {
                warn!("re-upload failed: {err}");
                SaveState::Failed(err)
            }
        }
    }

    async fn stored_copy_matches(&self, location: &ObjectLocation, ctx: &SaveContext<'_>) -> bool {
        let info = match self.store.head(location).await {
            Ok(Some(info)) => info,
            Ok(None) => return false,
            Err(err) => {
                debug!("head failed, assuming no stored copy: {err}");
                return false;
            }
        };
        match ctx.asset.read_all().await {
            Ok(bytes) => bytes.len() as u64 == info.len && sha256_hex(&bytes) == info.sha256,
            Err(_) => false,
        }
    }

    // -- Persist --------------------------------------------------------------

    async fn persist(
        &self,
        image_url: Option<String>,
        secondary_asset_id: Option<String>,
        ctx: &mut SaveContext<'_>,
    ) -> SaveState {
        ctx.report.stages.push(Stage::Persist);
        let request = ctx.request;

        let mut receipt = request.receipt.clone();
        let metadata = receipt.metadata.get_or_insert_with(ReceiptMetadata::default);
        metadata.user_id.get_or_insert_with(|| request.owner_id.clone());
        metadata.uploaded_at = Some(Utc::now().to_rfc3339());

        let record = AssetRecord::new(
            request.receipt_id,
            request.owner_id.clone(),
            receipt,
            request.raw_text.clone(),
            image_url,
            secondary_asset_id,
        );
        let collection = record.collection_path();
        let document = record.receipt_id.to_string();

        if let Err(err) = self
            .metadata
            .merge_set(&collection, &document, record.to_fields())
            .await
        {
            warn!(%collection, %document, "asset stored but record not persisted: {err}");
            return SaveState::Failed(BelegError::MetadataPersist {
                document: format!("{collection}/{document}"),
                detail: err.to_string(),
            });
        }

        if let Some((listener, cooldown)) = &self.listener {
            if cooldown.try_acquire(record.receipt_id, Instant::now()) {
                listener.on_saved(&record);
            } else {
                debug!("save listener suppressed by cooldown");
            }
        }
        SaveState::Succeeded(record)
    }
}

fn first_attempt(location: ObjectLocation, tier: UploadTier) -> UploadAttempt {
    UploadAttempt {
        location,
        tier,
        attempt: 1,
        delay: Duration::ZERO,
    }
}

fn stream_unavailable(err: BelegError) -> BelegError {
    match err {
        BelegError::StreamUnavailable(_) => err,
        other => BelegError::StreamUnavailable(other.to_string()),
    }
}
