// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Corner editor: four draggable handles over a letterboxed preview, plus the
// mapping between display and image pixel space.

use belegwerk_core::error::{BelegError, Result};
use image::RgbaImage;
use tracing::{debug, instrument};

use crate::geometry::{Point, Quad, normalize_corners, perspective_warp};

/// Width and height of a display viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    /// Viewport of `width` by `height` display units.
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Fit-inside mapping between image pixels and a display viewport.
///
/// Recompute it whenever the viewport or the image changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMapping {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    viewport: Viewport,
}

impl ViewportMapping {
    /// Largest uniform scale that fits the image in `viewport`, centred.
    pub fn fit_inside(image_width: u32, image_height: u32, viewport: Viewport) -> Result<Self> {
        if image_width == 0 || image_height == 0 {
            return Err(BelegError::Viewport(format!(
                "image has no area ({image_width}x{image_height})"
            )));
        }
        if !(viewport.width > 0.0 && viewport.height > 0.0) {
            return Err(BelegError::Viewport(format!(
                "viewport has no area ({}x{})",
                viewport.width, viewport.height
            )));
        }
        let (iw, ih) = (image_width as f64, image_height as f64);
        let scale = (viewport.width / iw).min(viewport.height / ih);
        Ok(Self {
            scale,
            offset_x: (viewport.width - iw * scale) / 2.0,
            offset_y: (viewport.height - ih * scale) / 2.0,
            viewport,
        })
    }

    /// Viewport this mapping was computed for.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Image pixel to display point.
    pub fn to_display(&self, p: Point) -> Point {
        Point::new(p.x * self.scale + self.offset_x, p.y * self.scale + self.offset_y)
    }

    /// Display point to image pixel.
    pub fn to_image(&self, p: Point) -> Point {
        Point::new((p.x - self.offset_x) / self.scale, (p.y - self.offset_y) / self.scale)
    }

    fn clamp_to_viewport(&self, p: Point) -> Point {
        Point::new(
            p.x.clamp(0.0, self.viewport.width),
            p.y.clamp(0.0, self.viewport.height),
        )
    }
}

/// Image-space quad to display space.
pub fn to_display_space(quad: &Quad, image_width: u32, image_height: u32, viewport: Viewport) -> Result<Quad> {
    let mapping = ViewportMapping::fit_inside(image_width, image_height, viewport)?;
    Ok(quad.map(|p| mapping.to_display(p)))
}

/// Display-space quad to image space.
pub fn to_image_space(quad: &Quad, image_width: u32, image_height: u32, viewport: Viewport) -> Result<Quad> {
    let mapping = ViewportMapping::fit_inside(image_width, image_height, viewport)?;
    Ok(quad.map(|p| mapping.to_image(p)))
}

/// Interactive corner state, held in display space.
#[derive(Debug, Clone)]
pub struct CornerEditor {
    quad: Quad,
    image_size: (u32, u32),
    mapping: ViewportMapping,
    handle_radius: f64,
    active: Option<usize>,
}

impl CornerEditor {
    /// Start editing from an image-space quad.
    pub fn new(
        image_quad: &Quad,
        image_width: u32,
        image_height: u32,
        viewport: Viewport,
        handle_radius: f64,
    ) -> Result<Self> {
        let mapping = ViewportMapping::fit_inside(image_width, image_height, viewport)?;
        Ok(Self {
            quad: image_quad.map(|p| mapping.to_display(p)),
            image_size: (image_width, image_height),
            mapping,
            handle_radius,
            active: None,
        })
    }

    /// Handles on the image corners, used when nothing was detected.
    pub fn full_image(image_width: u32, image_height: u32, viewport: Viewport, handle_radius: f64) -> Result<Self> {
        Self::new(
            &Quad::full_image(image_width, image_height),
            image_width,
            image_height,
            viewport,
            handle_radius,
        )
    }

    /// Handles in display space.
    pub fn display_quad(&self) -> Quad {
        self.quad
    }

    /// Current image-to-display mapping.
    pub fn mapping(&self) -> ViewportMapping {
        self.mapping
    }

    /// Index of the handle being dragged.
    pub fn active_handle(&self) -> Option<usize> {
        self.active
    }

    /// Select the nearest handle within twice the drawn radius of `p`.
    pub fn begin_drag(&mut self, p: Point) -> Option<usize> {
        let hit = 2.0 * self.handle_radius;
        self.active = self
            .quad
            .points
            .iter()
            .enumerate()
            .map(|(i, handle)| (i, handle.distance_squared(p)))
            .filter(|(_, d2)| *d2 <= hit * hit)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        debug!(handle = ?self.active, "drag started");
        self.active
    }

    /// Move the selected handle, if any. Returns whether anything moved.
    pub fn move_drag(&mut self, p: Point) -> bool {
        match self.active {
            Some(i) => {
                self.quad.points[i] = self.mapping.clamp_to_viewport(p);
                true
            }
            None => false,
        }
    }

    /// Release the selected handle.
    pub fn end_drag(&mut self) {
        self.active = None;
    }

    /// Re-layout for a new viewport, keeping the corners on the same image
    /// pixels. Any drag in progress is dropped.
    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        let image_quad = self.commit();
        let (w, h) = self.image_size;
        self.mapping = ViewportMapping::fit_inside(w, h, viewport)?;
        self.quad = image_quad.map(|p| self.mapping.to_display(p));
        self.active = None;
        Ok(())
    }

    /// Current corners in image space, in handle order.
    pub fn commit(&self) -> Quad {
        self.quad.map(|p| self.mapping.to_image(p))
    }

    /// Commit, reorder the corners clockwise from top-left and warp `source`
    /// with the result. Handles dragged past each other do not mirror the crop.
    #[instrument(skip(self, source))]
    pub fn crop(&self, source: &RgbaImage) -> Result<RgbaImage> {
        let (w, h) = self.image_size;
        let quad = normalize_corners(&self.commit().points, w, h)?;
        perspective_warp(source, &quad)
    }
}
