// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capture flow: scanner result in, flattened and enhanced JPEG out.

use std::path::PathBuf;

use belegwerk_core::CaptureConfig;
use belegwerk_core::error::{BelegError, Result};
use image::RgbaImage;
use tracing::{debug, info, instrument, warn};

use super::enhance::ScanEnhancer;
use crate::geometry::{Point, Quad, normalize_corners, perspective_warp};
use crate::image::processor::ImageProcessor;

/// What a document scanner integration hands back.
///
/// Each integration implements this directly; any of the three may be absent.
pub trait ScannerResult {
    /// Detected corner points, pixel or unit-normalized, in any order.
    fn corners(&self) -> Option<Vec<Point>>;
    /// The captured image, when the scanner keeps it in memory.
    fn image(&self) -> Option<RgbaImage>;
    /// Where the captured image was written, when it was.
    fn locator(&self) -> Option<PathBuf>;
}

/// Plain [`ScannerResult`] for callers that already hold the pieces.
#[derive(Debug, Clone, Default)]
pub struct ScannedPage {
    pub corners: Option<Vec<Point>>,
    pub image: Option<RgbaImage>,
    pub locator: Option<PathBuf>,
}

impl ScannerResult for ScannedPage {
    fn corners(&self) -> Option<Vec<Point>> {
        self.corners.clone()
    }

    fn image(&self) -> Option<RgbaImage> {
        self.image.clone()
    }

    fn locator(&self) -> Option<PathBuf> {
        self.locator.clone()
    }
}

/// Result of processing one capture.
#[derive(Debug, Clone)]
pub struct ProcessedCapture {
    /// The capture before any warp or enhancement, kept for manual re-cropping.
    pub source: RgbaImage,
    /// Normalized corners the warp used, if any.
    pub corners: Option<Quad>,
    /// Whether a warp was actually applied.
    pub warped: bool,
    pub enhanced: RgbaImage,
    pub jpeg: Vec<u8>,
}

fn resolve_image(result: &dyn ScannerResult) -> Result<RgbaImage> {
    if let Some(image) = result.image() {
        return Ok(image);
    }
    match result.locator() {
        Some(path) => Ok(ImageProcessor::open(path)?.into_rgba8()),
        None => Err(BelegError::NoImage),
    }
}

/// Flatten (when corners are known), enhance and encode a capture.
///
/// Degenerate corners are not an error here: the unwarped image is enhanced
/// instead.
#[instrument(skip_all)]
pub fn process_capture(result: &dyn ScannerResult, config: &CaptureConfig) -> Result<ProcessedCapture> {
    let source = resolve_image(result)?;
    let (w, h) = source.dimensions();
    info!(w, h, "processing capture");

    let corners = match result.corners() {
        Some(points) => match normalize_corners(&points, w, h) {
            Ok(quad) => Some(quad),
            Err(err) => {
                warn!("ignoring scanner corners: {err}");
                None
            }
        },
        None => None,
    };

    let (flat, warped) = match &corners {
        Some(quad) => match perspective_warp(&source, quad) {
            Ok(img) => (img, true),
            Err(err) => {
                warn!("keeping unwarped capture: {err}");
                (source.clone(), false)
            }
        },
        None => (source.clone(), false),
    };

    let (enhanced, jpeg) = enhance_and_encode(flat, config)?;
    Ok(ProcessedCapture {
        source,
        corners,
        warped,
        enhanced,
        jpeg,
    })
}

/// Re-run warp and enhancement with corners committed from the editor.
///
/// Unlike [`process_capture`], a degenerate quad is returned to the caller so
/// the user can fix the corners.
#[instrument(skip_all)]
pub fn recrop_and_enhance(source: &RgbaImage, quad: &Quad, config: &CaptureConfig) -> Result<ProcessedCapture> {
    let flat = perspective_warp(source, quad)?;
    let (enhanced, jpeg) = enhance_and_encode(flat, config)?;
    Ok(ProcessedCapture {
        source: source.clone(),
        corners: Some(*quad),
        warped: true,
        enhanced,
        jpeg,
    })
}

fn enhance_and_encode(flat: RgbaImage, config: &CaptureConfig) -> Result<(RgbaImage, Vec<u8>)> {
    let enhanced = ScanEnhancer::new(flat).enhance(config).into_rgba();
    let jpeg = ImageProcessor::from_rgba(enhanced.clone()).to_jpeg_bytes(config.jpeg_quality)?;
    debug!(bytes = jpeg.len(), "capture encoded");
    Ok((enhanced, jpeg))
}
