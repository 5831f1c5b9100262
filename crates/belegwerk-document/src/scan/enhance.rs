// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan enhancement pipeline: margin trimming, bounded downscaling, contrast
// adjustment and a 3x3 sharpen, always in that order.

use belegwerk_core::CaptureConfig;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::{debug, info, instrument};

/// Sharpen kernel, row-major.
const SHARPEN_KERNEL: [[i32; 3]; 3] = [[0, -1, 0], [-1, 5, -1], [0, -1, 0]];

/// Enhances a flattened receipt image for storage.
///
/// Each method consumes `self` and returns the transformed enhancer, so the
/// stages chain in the fixed pipeline order:
///
/// ```ignore
/// let out = ScanEnhancer::new(img)
///     .trim_whitespace(230)
///     .scale_to_max_dimension(1600)
///     .apply_contrast(1.15, -10.0)
///     .apply_sharpen()
///     .into_rgba();
/// ```
pub struct ScanEnhancer {
    image: RgbaImage,
}

impl ScanEnhancer {
    /// Wrap a flattened receipt image.
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Borrow the current image.
    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }

    /// Consume the enhancer and return the image.
    pub fn into_rgba(self) -> RgbaImage {
        self.image
    }

    /// Crop margins with no pixel darker than `threshold`.
    #[instrument(skip(self))]
    pub fn trim_whitespace(self, threshold: u8) -> Self {
        Self {
            image: trim_whitespace(&self.image, threshold),
        }
    }

    /// Downscale so neither side exceeds `max_dimension`. Never upscales.
    #[instrument(skip(self))]
    pub fn scale_to_max_dimension(self, max_dimension: u32) -> Self {
        Self {
            image: scale_to_max_dimension(&self.image, max_dimension),
        }
    }

    /// Scale each channel by `factor`, then add `offset`.
    #[instrument(skip(self))]
    pub fn apply_contrast(mut self, factor: f32, offset: f32) -> Self {
        apply_contrast(&mut self.image, factor, offset);
        self
    }

    /// 3x3 sharpen of interior pixels; the border is copied unchanged.
    #[instrument(skip(self))]
    pub fn apply_sharpen(self) -> Self {
        Self {
            image: apply_sharpen(&self.image),
        }
    }

    /// Run every stage with the configured parameters.
    #[instrument(skip_all, fields(w = self.image.width(), h = self.image.height()))]
    pub fn enhance(self, config: &CaptureConfig) -> Self {
        info!("Running receipt enhancement pipeline");
        let staged = self
            .trim_whitespace(config.trim_threshold)
            .scale_to_max_dimension(config.max_dimension)
            .apply_contrast(config.contrast, config.brightness);
        let out = if config.sharpen {
            staged.apply_sharpen()
        } else {
            staged
        };
        info!(
            out_w = out.image.width(),
            out_h = out.image.height(),
            "Enhancement complete"
        );
        out
    }
}

// -- Stages -------------------------------------------------------------------

fn is_content(pixel: &Rgba<u8>, threshold: u8) -> bool {
    let [r, g, b, _] = pixel.0;
    r.min(g).min(b) < threshold
}

/// Crop away margins that contain no pixel darker than `threshold`.
///
/// A blank image comes back unchanged.
pub fn trim_whitespace(image: &RgbaImage, threshold: u8) -> RgbaImage {
    let (w, h) = image.dimensions();
    let row_has_content = |y: u32| (0..w).any(|x| is_content(image.get_pixel(x, y), threshold));

    let Some(top) = (0..h).find(|&y| row_has_content(y)) else {
        debug!("no content found; image left untrimmed");
        return image.clone();
    };
    // A content row exists, so scanning up from the bottom stops at or above `top`.
    let bottom = (top..h).rev().find(|&y| row_has_content(y)).unwrap_or(top);

    let col_has_content =
        |x: u32| (top..=bottom).any(|y| is_content(image.get_pixel(x, y), threshold));
    let left = (0..w).find(|&x| col_has_content(x)).unwrap_or(0);
    let right = (left..w).rev().find(|&x| col_has_content(x)).unwrap_or(left);

    let (crop_w, crop_h) = (right - left + 1, bottom - top + 1);
    debug!(left, top, crop_w, crop_h, "trimmed margins");
    imageops::crop_imm(image, left, top, crop_w, crop_h).to_image()
}

/// Downscale so the longer edge is at most `max_dimension`. Never upscales.
pub fn scale_to_max_dimension(image: &RgbaImage, max_dimension: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_dimension || max_dimension == 0 {
        return image.clone();
    }
    let scale = max_dimension as f64 / longest as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    debug!(w, h, new_w, new_h, "downscaling");
    imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

/// `clamp(round(v * factor + offset), 0, 255)` on each colour channel; alpha
/// is left alone.
pub fn apply_contrast(image: &mut RgbaImage, factor: f32, offset: f32) {
    let adjust = |v: u8| (v as f32 * factor + offset).round().clamp(0.0, 255.0) as u8;
    for pixel in image.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        *pixel = Rgba([adjust(r), adjust(g), adjust(b), a]);
    }
}

/// 3x3 sharpen over interior pixels. Border rows and columns are copied from
/// the input untouched. Alpha follows the centre pixel.
pub fn apply_sharpen(image: &RgbaImage) -> RgbaImage {
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    if w < 3 || h < 3 {
        return out;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = [0i32; 3];
            for (ky, row) in SHARPEN_KERNEL.iter().enumerate() {
                for (kx, &weight) in row.iter().enumerate() {
                    if weight == 0 {
                        continue;
                    }
                    let p = image.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for c in 0..3 {
                        acc[c] += weight * p.0[c] as i32;
                    }
                }
            }
            let alpha = image.get_pixel(x, y).0[3];
            out.put_pixel(
                x,
                y,
                Rgba([
                    acc[0].clamp(0, 255) as u8,
                    acc[1].clamp(0, 255) as u8,
                    acc[2].clamp(0, 255) as u8,
                    alpha,
                ]),
            );
        }
    }
    out
}

// -- Tests --------------------------------------------------------------------
