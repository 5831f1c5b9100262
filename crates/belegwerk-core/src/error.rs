// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Belegwerk.

use thiserror::Error;

/// Top-level error type for all Belegwerk operations.
#[derive(Debug, Error)]
pub enum BelegError {
    // -- Geometry / image errors --
    #[error("degenerate quadrilateral: {0}")]
    DegenerateQuadrilateral(String),

    #[error("invalid viewport mapping: {0}")]
    Viewport(String),

    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("scanner result carried no usable image")]
    NoImage,

    // -- Recognition / extraction --
    #[error("text recognition failed: {0}")]
    TextRecognition(String),

    #[error("structured extraction response could not be parsed: {0}")]
    StructuredExtractionParse(String),

    // -- Upload tiers --
    #[error("byte source could not be opened: {0}")]
    StreamUnavailable(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upload rejected with status {status}: {detail}")]
    UploadRejected { status: u16, detail: String },

    #[error("reference could not be resolved after {attempts} attempts: {last_error}")]
    ReferenceResolutionTimeout { attempts: u32, last_error: String },

    #[error("asset uploaded but metadata for {document} was not persisted: {detail}")]
    MetadataPersist { document: String, detail: String },

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BelegError {
    /// True for the object/location-not-found class of provider failures.
    ///
    /// Providers do not always surface a dedicated code, so any provider
    /// message mentioning "not found" is treated the same way.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ObjectNotFound(_) | Self::UploadRejected { status: 404, .. } => true,
            Self::Transport(detail) | Self::UploadRejected { detail, .. } => {
                detail.to_ascii_lowercase().contains("not found")
            }
            _ => false,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BelegError>;
