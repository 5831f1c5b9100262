// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// belegwerk-document: capture normalization for receipt photos.
//
// Provides the geometry engine (corner normalization, homography, perspective
// warp), the interactive corner editor, the enhancement pipeline (trim,
// downscale, contrast, sharpen) and the text extraction seams.

pub mod editor;
pub mod geometry;
pub mod image;
pub mod scan;

pub use editor::{CornerEditor, Viewport, ViewportMapping};
pub use geometry::{Homography, Point, Quad, compute_output_size, normalize_corners, perspective_warp};
pub use image::processor::ImageProcessor;
pub use scan::enhance::ScanEnhancer;
