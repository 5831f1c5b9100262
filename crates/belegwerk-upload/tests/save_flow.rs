// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Save flows through the upload coordinator against in-memory and on-disk
// collaborators.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use belegwerk_core::error::BelegError;
use belegwerk_core::{
    CooldownCache, ObjectLocation, ReceiptId, ReceiptInfo, SecondaryConfig, StoreInfo, StructuredReceipt,
    UploadConfig, UploadTier,
};
use belegwerk_upload::fake::{
    FakeFailure, FakeMetadataStore, FakeObjectStore, FakePresetProvider, RecordingListener, UploadKind,
};
use belegwerk_upload::{
    FileAsset, LocalDirStore, MemoryAsset, SaveRequest, SqliteMetadataStore, Stage, UploadCoordinator,
};
use serde_json::Value;

const PRIMARY_BUCKET: &str = "belegwerk.appspot.com";
const ALTERNATE_BUCKET: &str = "belegwerk.firebasestorage.app";

fn request() -> SaveRequest {
    SaveRequest {
        receipt_id: ReceiptId::new(),
        owner_id: "u1".into(),
        receipt: StructuredReceipt {
            store: StoreInfo {
                name: Some("Corner Grocer".into()),
                ..Default::default()
            },
            receipt: ReceiptInfo {
                total: 12.5,
                ..Default::default()
            },
            ..Default::default()
        },
        raw_text: Some("CORNER GROCER\nTOTAL 12.50".into()),
    }
}

struct Harness {
    store: Arc<FakeObjectStore>,
    metadata: Arc<FakeMetadataStore>,
    coordinator: UploadCoordinator,
}

fn harness(config: UploadConfig) -> Harness {
    let store = Arc::new(FakeObjectStore::new());
    let metadata = Arc::new(FakeMetadataStore::new());
    let coordinator = UploadCoordinator::new(store.clone(), metadata.clone(), config);
    Harness {
        store,
        metadata,
        coordinator,
    }
}

fn primary_of(req: &SaveRequest) -> ObjectLocation {
    ObjectLocation::for_receipt(PRIMARY_BUCKET, &req.owner_id, req.receipt_id)
}

#[tokio::test]
async fn primary_upload_persists_record() {
    let h = harness(UploadConfig::default());
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    let record = outcome.result.unwrap();

    let expected_url = format!("fake://{PRIMARY_BUCKET}/receipts/u1/{}.jpg", req.receipt_id);
    assert_eq!(record.image_url.as_deref(), Some(expected_url.as_str()));
    assert_eq!(
        outcome.report.stages,
        vec![
            Stage::Primary { stream: true },
            Stage::Resolve { tier: UploadTier::Primary, attempt: 1 },
            Stage::Persist,
        ]
    );

    let doc = h
        .metadata
        .document("users/u1/receipts", &req.receipt_id.to_string())
        .await
        .unwrap();
    assert_eq!(doc.get("imageUrl"), Some(&Value::from(expected_url)));
    assert_eq!(doc.get("storeName"), Some(&Value::from("Corner Grocer")));
    assert_eq!(doc["metadata"]["userId"], Value::from("u1"));
    assert_eq!(asset.opened(), asset.closed());
}

#[tokio::test]
async fn failed_secondary_falls_back_to_primary_once() {
    let mut h = harness(UploadConfig::default());
    let provider = Arc::new(FakePresetProvider::failing("connection refused"));
    h.coordinator = h.coordinator.with_secondary(provider.clone());
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(outcome.result.is_ok());
    assert_eq!(provider.call_count(), 1);
    assert_eq!(h.store.upload_calls.load(Ordering::Relaxed), 1);
    assert_eq!(outcome.report.count(|s| matches!(s, Stage::Primary { .. })), 1);
    assert_eq!(outcome.report.stages[0], Stage::Secondary);
}

#[tokio::test]
async fn secondary_success_skips_primary() {
    let config = UploadConfig {
        secondary: Some(SecondaryConfig {
            folder_root: Some("/receipts/".into()),
        }),
        ..UploadConfig::default()
    };
    let mut h = harness(config);
    let provider = Arc::new(FakePresetProvider::succeeding("https://cdn.example/r.jpg", "receipts/u1/r"));
    h.coordinator = h.coordinator.with_secondary(provider.clone());
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let record = h.coordinator.save(&req, &asset).await.into_result().unwrap();
    assert_eq!(record.image_url.as_deref(), Some("https://cdn.example/r.jpg"));
    assert_eq!(record.secondary_asset_id.as_deref(), Some("receipts/u1/r"));
    assert_eq!(h.store.upload_calls.load(Ordering::Relaxed), 0);
    assert_eq!(provider.folders().await, vec![format!("receipts/u1/{}", req.receipt_id)]);
}

#[tokio::test(start_paused = true)]
async fn resolution_backs_off_exponentially() {
    let h = harness(UploadConfig::default());
    h.store.fail_next_resolves(2, FakeFailure::NotFound).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(outcome.result.is_ok());
    assert_eq!(
        outcome.report.backoff,
        vec![Duration::from_millis(2000), Duration::from_millis(4000)]
    );
    assert_eq!(h.store.resolve_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_resolution_skips_reupload_when_digest_matches() {
    let h = harness(UploadConfig::default());
    h.store.fail_next_resolves(3, FakeFailure::Transient).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(outcome.result.is_ok());
    assert!(outcome.report.stages.contains(&Stage::Reupload { skipped: true }));
    assert!(outcome.report.stages.contains(&Stage::Resolve {
        tier: UploadTier::Reupload,
        attempt: 1
    }));
    assert_eq!(h.store.upload_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn reupload_without_verification_uploads_again() {
    let config = UploadConfig {
        verify_before_reupload: false,
        ..UploadConfig::default()
    };
    let h = harness(config);
    h.store.fail_next_resolves(3, FakeFailure::Transient).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(outcome.result.is_ok());
    assert!(outcome.report.stages.contains(&Stage::Reupload { skipped: false }));
    assert_eq!(h.store.upload_calls.load(Ordering::Relaxed), 2);
    assert_eq!(h.store.uploads_of(UploadKind::Stream).await, 2);
    assert_eq!(asset.opened(), 2);
    assert_eq!(asset.closed(), 2);
}

#[tokio::test(start_paused = true)]
async fn unresolvable_reference_times_out_after_one_reupload() {
    let h = harness(UploadConfig::default());
    h.store.fail_all_resolves(FakeFailure::Transient).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    match outcome.result {
        Err(BelegError::ReferenceResolutionTimeout { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected resolution timeout, got {other:?}"),
    }
    assert_eq!(outcome.report.count(|s| matches!(s, Stage::Reupload { .. })), 1);
    assert_eq!(h.store.resolve_count(), 6);
    assert_eq!(
        outcome.report.backoff,
        vec![
            Duration::from_millis(2000),
            Duration::from_millis(4000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
        ]
    );
    assert!(h.metadata.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn permanent_resolution_error_uses_full_rounds() {
    let h = harness(UploadConfig::default());
    h.store.fail_all_resolves(FakeFailure::Permanent).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(matches!(
        outcome.result,
        Err(BelegError::ReferenceResolutionTimeout { attempts: 3, .. })
    ));
    assert_eq!(h.store.resolve_count(), 6);
    assert_eq!(outcome.report.count(|s| matches!(s, Stage::Reupload { .. })), 1);
    assert_eq!(outcome.report.backoff.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn permanent_resolution_error_can_recover() {
    let h = harness(UploadConfig::default());
    h.store.fail_next_resolves(2, FakeFailure::Permanent).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(outcome.result.is_ok());
    assert_eq!(h.store.resolve_count(), 3);
    assert_eq!(outcome.report.count(|s| matches!(s, Stage::Reupload { .. })), 0);
}

#[tokio::test]
async fn every_tier_failing_tries_each_fallback_once() {
    let h = harness(UploadConfig::default());
    h.store.fail_all_uploads(FakeFailure::NotFound).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(matches!(outcome.result, Err(BelegError::ObjectNotFound(_))));
    assert_eq!(
        outcome.report.stages,
        vec![
            Stage::Primary { stream: true },
            Stage::AlternateBucket {
                bucket: ALTERNATE_BUCKET.into()
            },
            Stage::WholePayload,
        ]
    );
    assert_eq!(h.store.upload_calls.load(Ordering::Relaxed), 3);
    assert_eq!(asset.opened(), asset.closed());
    assert_eq!(h.store.resolve_count(), 0);
}

#[tokio::test]
async fn missing_bucket_moves_to_alternate_spelling() {
    let h = harness(UploadConfig::default());
    h.store.remove_bucket(PRIMARY_BUCKET).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let record = h.coordinator.save(&req, &asset).await.into_result().unwrap();
    let alternate = primary_of(&req).with_bucket(ALTERNATE_BUCKET);
    assert_eq!(
        record.image_url,
        Some(format!("fake://{}/{}", alternate.bucket, alternate.path))
    );
    assert_eq!(h.store.object(&alternate).await, Some(b"jpeg".to_vec()));
    assert_eq!(h.store.uploads_to_bucket(PRIMARY_BUCKET).await, 1);
}

#[tokio::test]
async fn transient_upload_failure_falls_back_to_whole_payload() {
    let h = harness(UploadConfig::default());
    h.store.fail_next_uploads(1, FakeFailure::Transient).await;
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(outcome.result.is_ok());
    assert_eq!(
        outcome.report.stages,
        vec![
            Stage::Primary { stream: true },
            Stage::WholePayload,
            Stage::Resolve { tier: UploadTier::WholePayload, attempt: 1 },
            Stage::Persist,
        ]
    );
    assert_eq!(h.store.uploads_of(UploadKind::Bytes).await, 1);
    assert_eq!(h.store.object(&primary_of(&req)).await, Some(b"jpeg".to_vec()));
}

#[tokio::test]
async fn metadata_failure_is_reported_after_upload() {
    let h = harness(UploadConfig::default());
    h.metadata.set_failing(true);
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    let outcome = h.coordinator.save(&req, &asset).await;
    match outcome.result {
        Err(BelegError::MetadataPersist { document, .. }) => {
            assert_eq!(document, format!("users/u1/receipts/{}", req.receipt_id));
        }
        other => panic!("expected metadata failure, got {other:?}"),
    }
    assert!(h.store.object(&primary_of(&req)).await.is_some());
}

#[tokio::test]
async fn revoked_asset_fails_without_uploading() {
    let h = harness(UploadConfig::default());
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());
    asset.revoke();

    let outcome = h.coordinator.save(&req, &asset).await;
    assert!(matches!(outcome.result, Err(BelegError::StreamUnavailable(_))));
    assert_eq!(h.store.upload_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn listener_fires_once_per_cooldown_window() {
    let listener = Arc::new(RecordingListener::new());
    let cooldown = Arc::new(CooldownCache::new(Duration::from_secs(5)));
    let mut h = harness(UploadConfig::default());
    h.coordinator = h.coordinator.with_listener(listener.clone(), cooldown);
    let req = request();
    let asset = MemoryAsset::new(b"jpeg".to_vec());

    assert!(h.coordinator.save(&req, &asset).await.result.is_ok());
    assert!(h.coordinator.save(&req, &asset).await.result.is_ok());
    assert_eq!(listener.seen(), vec![req.receipt_id]);
    assert_eq!(h.metadata.merge_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn file_asset_saves_to_disk_and_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("receipt.jpg");
    std::fs::write(&image_path, b"jpeg on disk").unwrap();

    let store = Arc::new(LocalDirStore::new(dir.path().join("objects")));
    let metadata = SqliteMetadataStore::open(dir.path().join("meta.db")).unwrap();
    let coordinator = UploadCoordinator::new(store.clone(), Arc::new(metadata.clone()), UploadConfig::default());
    let req = request();

    let outcome = coordinator.save(&req, &FileAsset::new(&image_path)).await;
    assert_eq!(outcome.report.stages[0], Stage::Primary { stream: false });
    let record = outcome.result.unwrap();
    assert!(record.image_url.as_deref().unwrap().starts_with("file://"));

    let stored = std::fs::read(store.path_of(&primary_of(&req)).unwrap()).unwrap();
    assert_eq!(stored, b"jpeg on disk");

    let doc = metadata
        .get("users/u1/receipts", &req.receipt_id.to_string())
        .unwrap()
        .unwrap();
    assert_eq!(doc.get("total"), Some(&Value::from(12.5)));
    assert_eq!(doc.get("rawText"), Some(&Value::from("CORNER GROCER\nTOTAL 12.50")));
}
