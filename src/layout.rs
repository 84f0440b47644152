//! Containment layout for the base photo
//!
//! The base image is fitted inside the container preserving its aspect
//! ratio, enlarged by the zoom factor, centred and then displaced by the
//! pan offset. Every overlay is positioned through the same [`LayoutRect`]
//! so it stays glued to the photo.

use serde::{Deserialize, Serialize};

use crate::geometry::{Point2D, Quad};

/// Zoom limits, 1.0 being "fit inside the container"
pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 4.0;

/// Zoom change per unit of wheel delta
const WHEEL_ZOOM_FACTOR: f64 = 0.001;

/// Container size in CSS pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Where an image lands inside the container
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LayoutRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Image pixels to surface pixels, before rounding of the rectangle
    pub scale: f64,
}

/// Clamp a zoom factor into `[MIN_ZOOM, MAX_ZOOM]`
pub fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_nan() {
        return MIN_ZOOM;
    }
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Apply a mouse-wheel delta to the current zoom (scrolling up zooms in)
pub fn zoom_by_wheel(zoom: f64, delta_y: f64) -> f64 {
    clamp_zoom(zoom - delta_y * WHEEL_ZOOM_FACTOR)
}

/// Compute the placement of an `image_width x image_height` image
///
/// Sizes and offsets are rounded to whole pixels so the base image and
/// anything drawn against the same layout share pixel boundaries.
pub fn compute_layout(
    container: Size,
    image_width: u32,
    image_height: u32,
    zoom: f64,
    pan: Point2D,
) -> LayoutRect {
    let container_w = container.width.max(1.0);
    let container_h = container.height.max(1.0);
    let image_w = image_width.max(1) as f64;
    let image_h = image_height.max(1) as f64;

    let scale = (container_w / image_w).min(container_h / image_h) * clamp_zoom(zoom);

    let width = (image_w * scale).round();
    let height = (image_h * scale).round();
    let x = ((container_w - width) / 2.0 + pan.x).round();
    let y = ((container_h - height) / 2.0 + pan.y).round();

    LayoutRect {
        x,
        y,
        width,
        height,
        scale,
    }
}

/// Map a point authored in image pixels into surface space
#[inline]
pub fn map_image_to_surface(point: Point2D, layout: &LayoutRect) -> Point2D {
    Point2D::new(point.x * layout.scale + layout.x, point.y * layout.scale + layout.y)
}

/// Inverse of [`map_image_to_surface`]
#[inline]
pub fn map_surface_to_image(point: Point2D, layout: &LayoutRect) -> Point2D {
    Point2D::new(
        (point.x - layout.x) / layout.scale,
        (point.y - layout.y) / layout.scale,
    )
}

/// Map all four corners of an image-space quad into surface space
pub fn map_quad_to_surface(quad: &Quad, layout: &LayoutRect) -> Quad {
    quad.map(|p| map_image_to_surface(p, layout))
}

/// Clamp a reveal percentage into `[0, 100]`
pub fn clamp_reveal(reveal: f64) -> f64 {
    if reveal.is_nan() {
        return 50.0;
    }
    reveal.clamp(0.0, 100.0)
}

/// Horizontal position of the reveal boundary, `reveal` percent across
///
/// The original photo stays left of the boundary and the generated one is
/// shown right of it.
pub fn reveal_split_x(container_width: f64, reveal: f64) -> f64 {
    container_width * (clamp_reveal(reveal) / 100.0)
}

/// Reveal percentage that puts the boundary at `x`
pub fn reveal_at_x(container_width: f64, x: f64) -> f64 {
    if container_width <= 0.0 {
        return 50.0;
    }
    clamp_reveal(x / container_width * 100.0)
}

/// Whether `container` at `dpr` stays within `max` device pixels per side
pub fn fits_device_surface(container: Size, dpr: f64, max: u32) -> bool {
    let max = max as f64;
    (container.width * dpr).round() <= max && (container.height * dpr).round() <= max
}
