// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: opens the local backends once and wires the capture
// pipeline, receipt extraction and the upload coordinator together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use belegwerk_core::error::{BelegError, Result};
use belegwerk_core::{AppConfig, AssetRecord, CooldownCache, ReceiptId, StructuredReceipt};
use belegwerk_document::Point;
use belegwerk_document::scan::{ExtractionSource, ProcessedCapture, ScannedPage, StructuredExtractor, process_capture};
use belegwerk_document::scan::{extract_receipt, parse_receipt_text};
use belegwerk_upload::{LocalDirStore, MemoryAsset, SaveListener, SaveOutcome, SaveRequest, SqliteMetadataStore, UploadCoordinator};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::data_dir;

/// Logs each persisted record.
struct LogListener;

impl SaveListener for LogListener {
    fn on_saved(&self, record: &AssetRecord) {
        info!(
            receipt = %record.receipt_id,
            store = record.store_name().unwrap_or("-"),
            total = record.total(),
            "receipt saved"
        );
    }
}

/// Structured extractor replaying a previously recorded model response.
pub struct RecordedExtractor {
    path: PathBuf,
}

impl RecordedExtractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StructuredExtractor for RecordedExtractor {
    async fn extract(&self, _raw_text: &str) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| BelegError::TextRecognition(format!("{}: {e}", self.path.display())))
    }
}

/// Everything a save needs besides the image.
#[derive(Debug, Default)]
pub struct SaveInput {
    pub owner_id: String,
    pub ocr_text: Option<String>,
    pub extraction: Option<PathBuf>,
}

/// Services shared by every command.
pub struct AppServices {
    data_dir: PathBuf,
    config: AppConfig,
    metadata: SqliteMetadataStore,
    coordinator: UploadCoordinator,
}

impl AppServices {
    /// Open the backends under `data_dir`. An explicit `config_path` must
    /// load; otherwise `config.json` in the data directory is used when
    /// present.
    pub fn init(data_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        data_dir::ensure_layout(data_dir)?;
        info!(path = %data_dir.display(), "initialising app services");

        let config = match config_path {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::load_or_default(data_dir.join("config.json")),
        };
        config.validate()?;

        let store = Arc::new(LocalDirStore::new(data_dir.join("objects")));
        let metadata = SqliteMetadataStore::open(data_dir.join("metadata.db"))?;
        let cooldown = Arc::new(CooldownCache::new(config.upload.listener_cooldown()));
        let coordinator = UploadCoordinator::new(store, Arc::new(metadata.clone()), config.upload.clone())
            .with_listener(Arc::new(LogListener), cooldown);

        info!("app services initialised");
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            metadata,
            coordinator,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Flatten and enhance one image file.
    pub fn enhance(&self, image: &Path, corners: Option<Vec<Point>>) -> Result<ProcessedCapture> {
        let page = ScannedPage {
            corners,
            image: None,
            locator: Some(image.to_path_buf()),
        };
        process_capture(&page, &self.config.capture)
    }

    /// Receipt fields for `input`: from the recorded extraction when given,
    /// heuristically otherwise.
    pub async fn receipt_fields(&self, input: &SaveInput) -> StructuredReceipt {
        let text = input.ocr_text.as_deref().unwrap_or_default();
        match &input.extraction {
            Some(path) => {
                let extracted = extract_receipt(&RecordedExtractor::new(path), text, Utc::now()).await;
                if extracted.source == ExtractionSource::Heuristic {
                    warn!(path = %path.display(), "recorded extraction unusable");
                }
                extracted.receipt
            }
            None => parse_receipt_text(text, Utc::now()),
        }
    }

    /// Enhance `image`, derive its fields and persist both.
    pub async fn save(&self, image: &Path, corners: Option<Vec<Point>>, input: &SaveInput) -> Result<SaveOutcome> {
        let capture = self.enhance(image, corners)?;
        let receipt = self.receipt_fields(input).await;
        let request = SaveRequest {
            receipt_id: ReceiptId::new(),
            owner_id: input.owner_id.clone(),
            receipt,
            raw_text: input.ocr_text.clone(),
        };
        let asset = MemoryAsset::new(capture.jpeg);
        Ok(self.coordinator.save(&request, &asset).await)
    }

    /// Stored records of `owner_id`, keyed by receipt id.
    pub fn records(&self, owner_id: &str) -> Result<Vec<(String, Map<String, Value>)>> {
        let collection = format!("users/{owner_id}/receipts");
        let mut out = Vec::new();
        for id in self.metadata.list(&collection)? {
            if let Some(doc) = self.metadata.get(&collection, &id)? {
                out.push((id, doc));
            }
        }
        Ok(out)
    }
}
