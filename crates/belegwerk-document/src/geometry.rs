// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Geometry engine: corner normalization, output sizing, homography solving
// and the perspective warp that turns a skewed capture into a flat rectangle.

use belegwerk_core::error::{BelegError, Result};
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Magnitude under which every coordinate is read as unit-normalized.
const NORMALIZED_LIMIT: f64 = 1.01;
/// Two points closer than this (in pixels) are the same point.
const DISTINCT_EPSILON: f64 = 1e-6;
/// y-values closer than this tie when picking the top-left corner.
const TOP_TIE_EPSILON: f64 = 1e-3;
/// Triangles with a smaller area make the correspondence system singular.
const MIN_TRIANGLE_AREA: f64 = 1e-6;

/// A 2D point in pixel (or display) coordinates, y pointing down.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn distance_squared(self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Four corners ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub points: [Point; 4],
}

impl Quad {
    pub const fn new(tl: Point, tr: Point, br: Point, bl: Point) -> Self {
        Self {
            points: [tl, tr, br, bl],
        }
    }

    /// Quad covering a whole `width` x `height` image.
    pub fn full_image(width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        Self::new(
            Point::new(0.0, 0.0),
            Point::new(w, 0.0),
            Point::new(w, h),
            Point::new(0.0, h),
        )
    }

    pub fn top_left(&self) -> Point {
        self.points[0]
    }

    pub fn top_right(&self) -> Point {
        self.points[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.points[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.points[3]
    }

    /// Apply `f` to every corner, keeping the order.
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self {
            points: self.points.map(f),
        }
    }
}

/// Normalize four raw corner points into a pixel-space, TL-first quad.
///
/// Points whose coordinates all lie within `[-1.01, 1.01]` are read as
/// unit-normalized and scaled by the image size. The points are sorted by
/// angle around their centroid, then rotated so the topmost point (leftmost on
/// a tie) comes first.
#[instrument(skip(points), fields(count = points.len()))]
pub fn normalize_corners(points: &[Point], image_width: u32, image_height: u32) -> Result<Quad> {
    if points.len() != 4 {
        return Err(BelegError::DegenerateQuadrilateral(format!(
            "expected 4 corner points, got {}",
            points.len()
        )));
    }

    let normalized = points
        .iter()
        .all(|p| p.x.abs() <= NORMALIZED_LIMIT && p.y.abs() <= NORMALIZED_LIMIT);
    let mut pts: Vec<Point> = if normalized {
        let (w, h) = (image_width as f64, image_height as f64);
        points.iter().map(|p| Point::new(p.x * w, p.y * h)).collect()
    } else {
        points.to_vec()
    };

    let distinct = count_distinct(&pts);
    if distinct < 4 {
        return Err(BelegError::DegenerateQuadrilateral(format!(
            "only {distinct} distinct corner points"
        )));
    }

    let cx = pts.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / 4.0;
    pts.sort_by(|a, b| {
        let angle_a = (a.y - cy).atan2(a.x - cx);
        let angle_b = (b.y - cy).atan2(b.x - cx);
        angle_a.total_cmp(&angle_b)
    });

    let mut start = 0;
    for (i, p) in pts.iter().enumerate().skip(1) {
        let best = pts[start];
        let higher = p.y < best.y - TOP_TIE_EPSILON;
        let tie_left = (p.y - best.y).abs() <= TOP_TIE_EPSILON && p.x < best.x;
        if higher || tie_left {
            start = i;
        }
    }
    pts.rotate_left(start);

    let quad = Quad::new(pts[0], pts[1], pts[2], pts[3]);
    debug!(normalized, ?quad, "corners normalized");
    Ok(quad)
}

fn count_distinct(points: &[Point]) -> usize {
    let mut unique: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if !unique
            .iter()
            .any(|q| q.distance_squared(*p) <= DISTINCT_EPSILON * DISTINCT_EPSILON)
        {
            unique.push(*p);
        }
    }
    unique.len()
}

/// Size of the rectangle a quad is flattened onto: the longer of each pair of
/// opposite edges, rounded, at least 1.
pub fn compute_output_size(quad: &Quad) -> (u32, u32) {
    let width = quad
        .top_left()
        .distance(quad.top_right())
        .max(quad.bottom_left().distance(quad.bottom_right()));
    let height = quad
        .top_left()
        .distance(quad.bottom_left())
        .max(quad.top_right().distance(quad.bottom_right()));
    (round_dimension(width), round_dimension(height))
}

fn round_dimension(value: f64) -> u32 {
    let rounded = value.round();
    if rounded.is_finite() && rounded >= 1.0 {
        rounded.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

/// A planar projective transform, row-major with `h[8] == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    h: [f64; 9],
}

impl Homography {
    /// Solve the transform mapping each `src[i]` onto `dst[i]`.
    ///
    /// Fails when three of either set of points are collinear, when points
    /// coincide, or when the 8x8 system is otherwise singular.
    pub fn from_correspondences(src: &[Point; 4], dst: &[Point; 4]) -> Result<Self> {
        check_non_degenerate(src, "source")?;
        check_non_degenerate(dst, "destination")?;

        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];
        for i in 0..4 {
            let (x, y) = (src[i].x, src[i].y);
            let (u, v) = (dst[i].x, dst[i].y);
            a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y];
            b[2 * i] = u;
            a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y];
            b[2 * i + 1] = v;
        }

        let sol = solve_linear_system(a, b).ok_or_else(|| {
            BelegError::DegenerateQuadrilateral("correspondence system is singular".into())
        })?;
        Ok(Self {
            h: [sol[0], sol[1], sol[2], sol[3], sol[4], sol[5], sol[6], sol[7], 1.0],
        })
    }

    /// Transform mapping `quad` onto `[0,0]-[w,0]-[w,h]-[0,h]`.
    pub fn quad_to_rect(quad: &Quad, width: u32, height: u32) -> Result<Self> {
        let rect = Quad::full_image(width, height);
        Self::from_correspondences(&quad.points, &rect.points)
    }

    pub fn matrix(&self) -> [f64; 9] {
        self.h
    }

    /// Map a point. `None` when it lands on the line at infinity.
    pub fn apply(&self, p: Point) -> Option<Point> {
        let h = &self.h;
        let w = h[6] * p.x + h[7] * p.y + h[8];
        if w.abs() < f64::EPSILON {
            return None;
        }
        Some(Point::new(
            (h[0] * p.x + h[1] * p.y + h[2]) / w,
            (h[3] * p.x + h[4] * p.y + h[5]) / w,
        ))
    }

    /// Inverse transform, via the adjugate.
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.h;
        let c00 = m[4] * m[8] - m[5] * m[7];
        let c01 = m[5] * m[6] - m[3] * m[8];
        let c02 = m[3] * m[7] - m[4] * m[6];
        let det = m[0] * c00 + m[1] * c01 + m[2] * c02;
        if det.abs() < 1e-12 {
            return None;
        }
        let inv = [
            c00,
            m[2] * m[7] - m[1] * m[8],
            m[1] * m[5] - m[2] * m[4],
            c01,
            m[0] * m[8] - m[2] * m[6],
            m[2] * m[3] - m[0] * m[5],
            c02,
            m[1] * m[6] - m[0] * m[7],
            m[0] * m[4] - m[1] * m[3],
        ];
        let scale = inv[8];
        if scale.abs() < 1e-12 {
            return None;
        }
        Some(Self {
            h: inv.map(|v| v / scale),
        })
    }

    fn to_projection(self) -> Option<Projection> {
        Projection::from_matrix(self.h.map(|v| v as f32))
    }
}

fn check_non_degenerate(points: &[Point; 4], which: &str) -> Result<()> {
    if count_distinct(points) < 4 {
        return Err(BelegError::DegenerateQuadrilateral(format!(
            "{which} points coincide"
        )));
    }
    for skip in 0..4 {
        let tri: Vec<Point> = (0..4).filter(|&i| i != skip).map(|i| points[i]).collect();
        let area = ((tri[1].x - tri[0].x) * (tri[2].y - tri[0].y)
            - (tri[2].x - tri[0].x) * (tri[1].y - tri[0].y))
            .abs()
            / 2.0;
        if area < MIN_TRIANGLE_AREA {
            return Err(BelegError::DegenerateQuadrilateral(format!(
                "three {which} points are collinear"
            )));
        }
    }
    Ok(())
}

/// Gaussian elimination with partial pivoting.
fn solve_linear_system(mut a: [[f64; 8]; 8], mut b: [f64; 8]) -> Option<[f64; 8]> {
    const N: usize = 8;
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    for col in 0..N {
        let pivot_row = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() < 1e-12 * scale {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; N];
    for row in (0..N).rev() {
        let tail: f64 = (row + 1..N).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Flatten the region bounded by `quad` onto an upright rectangle sized by
/// [`compute_output_size`], sampling bilinearly.
///
/// The quad is used in the order given; callers normalize first when the
/// corners come from an untrusted source. On error the caller keeps the
/// source image.
#[instrument(skip(source), fields(src_w = source.width(), src_h = source.height()))]
pub fn perspective_warp(source: &RgbaImage, quad: &Quad) -> Result<RgbaImage> {
    let (out_w, out_h) = compute_output_size(quad);
    let homography = Homography::quad_to_rect(quad, out_w, out_h)?;
    let projection = homography.to_projection().ok_or_else(|| {
        BelegError::DegenerateQuadrilateral("transform is not invertible".into())
    })?;

    let mut output = RgbaImage::new(out_w, out_h);
    let fill = Rgba([255u8, 255, 255, 255]);
    warp_into(source, &projection, Interpolation::Bilinear, fill, &mut output);

    info!(out_w, out_h, "perspective warp applied");
    Ok(output)
}
