//! Frame composition
//!
//! Draws one frame from a [`RenderState`]: the base photo laid out by zoom
//! and pan, the warped texture preview on the floor, and, once a generated
//! image exists, the generated photo revealed right of a draggable split
//! line. The compositor reads the state and never changes it.

use anyhow::Result;
use image::{DynamicImage, ImageOutputFormat, Rgba};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

use crate::config::RenderConfig;
use crate::geometry::{Affine, Point2D};
use crate::layout::{compute_layout, map_quad_to_surface, reveal_split_x, LayoutRect};
use crate::session::{OverlayMode, RenderState};
use crate::surface::{Canvas, Surface};
use crate::warp::{draw_warped_image, WarpGrid, WarpReport};

const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([0x11, 0x11, 0x11, 0xff]);
const PLACEHOLDER_TEXT: Rgba<u8> = Rgba([0x66, 0x66, 0x66, 0xff]);
const HANDLE_LIGHT: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);
const HANDLE_DARK: Rgba<u8> = Rgba([0x1a, 0x1a, 0x1a, 0xff]);

/// Width of the reveal boundary line in CSS pixels
const SPLIT_LINE_WIDTH: f64 = 2.0;

/// Encoded still image formats for snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Jpeg,
    Png,
}

impl SnapshotFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "image/jpeg",
            SnapshotFormat::Png => "image/png",
        }
    }
}

/// What the last render did
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FrameReport {
    /// Backing surface size in device pixels
    pub width: u32,
    pub height: u32,
    /// The backing surface was reallocated for this frame
    pub resized: bool,
    /// No base image: the placeholder was drawn instead
    pub placeholder: bool,
    pub layout: Option<LayoutRect>,
    pub warp: Option<WarpReport>,
    /// Reveal boundary in CSS pixels, when the generated image is shown
    pub split_x: Option<f64>,
    /// Width of the region the generated image may paint into
    pub after_clip_width: Option<f64>,
    /// Image blits issued for this frame
    pub draw_calls: usize,
}

pub struct Compositor {
    canvas: Canvas,
    grid: WarpGrid,
    handle_radius: f64,
    max_dimension: u32,
}

impl Compositor {
    pub fn new(config: &RenderConfig) -> Self {
        let dpr = config.device_pixel_ratio;
        let max = config.max_surface_dimension;
        Self {
            canvas: Canvas::new(
                device_pixels(config.width as f64, dpr, max),
                device_pixels(config.height as f64, dpr, max),
            ),
            grid: config.grid,
            handle_radius: config.handle_radius,
            max_dimension: max,
        }
    }

    #[cfg(test)]
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Draw a complete frame for `state`
    pub fn render(&mut self, state: &RenderState) -> FrameReport {
        let dpr = state.device_pixel_ratio;
        let container = state.container;
        let width = device_pixels(container.width, dpr, self.max_dimension);
        let height = device_pixels(container.height, dpr, self.max_dimension);

        let resized = self.canvas.resize(width, height);
        if resized {
            debug!("Surface reallocated at {}x{}", width, height);
        }
        self.canvas.reset();
        self.canvas.reset_draw_calls();
        self.canvas.clear();
        self.canvas.set_transform(Affine::scale(dpr, dpr));

        let mut report = FrameReport {
            width,
            height,
            resized,
            ..Default::default()
        };

        let Some(base) = &state.base else {
            self.draw_placeholder(state);
            report.placeholder = true;
            return report;
        };

        let layout = compute_layout(container, base.width(), base.height(), state.zoom, state.pan);
        self.canvas
            .draw_image(base, layout.x, layout.y, layout.width, layout.height);
        report.layout = Some(layout);

        match state.mode {
            OverlayMode::PreviewOverlay | OverlayMode::Generating => {
                let floor = state.room.as_ref().and_then(|r| r.floor.as_ref());
                if let (Some(overlay), Some(floor)) = (&state.overlay, floor) {
                    let dest = map_quad_to_surface(floor, &layout);
                    report.warp = Some(draw_warped_image(
                        &mut self.canvas,
                        overlay,
                        dest.points(),
                        self.grid,
                    ));
                }
            }
            OverlayMode::Compared => {
                if let Some(after) = &state.after {
                    let split_x = reveal_split_x(container.width, state.reveal);
                    let clip_width = container.width - split_x;

                    self.canvas.save();
                    self.canvas.clip_rect(split_x, 0.0, clip_width, container.height);
                    self.canvas
                        .draw_image(after, layout.x, layout.y, layout.width, layout.height);
                    self.canvas.restore();

                    self.draw_reveal_handle(split_x, container.height);
                    report.split_x = Some(split_x);
                    report.after_clip_width = Some(clip_width);
                }
            }
            OverlayMode::Idle => {}
        }

        report.draw_calls = self.canvas.draw_calls();
        report
    }

    fn draw_placeholder(&mut self, state: &RenderState) {
        let (w, h) = (state.container.width, state.container.height);
        self.canvas.fill_rect(0.0, 0.0, w, h, PLACEHOLDER_BACKGROUND);

        let center = Point2D::new(w / 2.0, h / 2.0);
        match &state.room {
            Some(room) => {
                let title = if state.base_failed {
                    "Image Unavailable"
                } else {
                    "Loading Image..."
                };
                self.canvas
                    .fill_text(title, Point2D::new(center.x, center.y - 12.0), 2, PLACEHOLDER_TEXT);
                self.canvas.fill_text(
                    &room.image_url,
                    Point2D::new(center.x, center.y + 12.0),
                    1,
                    PLACEHOLDER_TEXT,
                );
            }
            None => {
                self.canvas
                    .fill_text("No Room Selected", center, 2, PLACEHOLDER_TEXT);
            }
        }
    }

    /// Split line with a round grip carrying two arrowheads
    fn draw_reveal_handle(&mut self, x: f64, height: f64) {
        let cy = height / 2.0;
        let r = self.handle_radius;

        self.canvas.stroke_line(
            Point2D::new(x, 0.0),
            Point2D::new(x, height),
            SPLIT_LINE_WIDTH,
            HANDLE_LIGHT,
        );
        self.canvas.fill_circle(Point2D::new(x, cy), r + 1.0, HANDLE_LIGHT);
        self.canvas.fill_circle(Point2D::new(x, cy), r - 1.0, HANDLE_DARK);

        let (inner, outer, half) = (r * 0.25, r * 0.6, r * 0.3);
        self.canvas.fill_polygon(
            &[
                Point2D::new(x - inner, cy - half),
                Point2D::new(x - inner, cy + half),
                Point2D::new(x - outer, cy),
            ],
            HANDLE_LIGHT,
        );
        self.canvas.fill_polygon(
            &[
                Point2D::new(x + inner, cy - half),
                Point2D::new(x + inner, cy + half),
                Point2D::new(x + outer, cy),
            ],
            HANDLE_LIGHT,
        );
    }

    /// Encode the last rendered frame
    pub fn snapshot(&self, format: SnapshotFormat, quality: u8) -> Result<Vec<u8>> {
        encode_frame(&self.canvas, format, quality)
    }
}

/// Encode a canvas as JPEG (alpha dropped) or PNG
pub fn encode_frame(canvas: &Canvas, format: SnapshotFormat, quality: u8) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    let mut cursor = Cursor::new(&mut encoded);
    match format {
        SnapshotFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(canvas.pixels().clone()).to_rgb8();
            rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(quality.clamp(1, 100)))?;
        }
        SnapshotFormat::Png => {
            canvas.pixels().write_to(&mut cursor, ImageOutputFormat::Png)?;
        }
    }
    Ok(encoded)
}

/// Device size of one surface side, kept within `1..=max`
fn device_pixels(css: f64, dpr: f64, max: u32) -> u32 {
    let px = (css * dpr).round();
    if px.is_nan() {
        return 1;
    }
    px.clamp(1.0, max.max(1) as f64) as u32
}
