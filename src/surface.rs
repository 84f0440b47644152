//! Raster drawing surface
//!
//! The compositor only needs what a 2D canvas offers: a transform stack,
//! convex clip paths, affine image blits and a handful of solid fills.
//! [`Surface`] captures that contract; [`Canvas`] is the software
//! implementation backed by an RGBA buffer.
//!
//! Clip paths and fills are resolved per pixel centre without
//! anti-aliasing. Image blits map each covered device pixel back through
//! the inverse transform and sample the source bilinearly.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;
use rayon::prelude::*;

use crate::geometry::{cross, Affine, Point2D};

/// Decoded bitmap as held by the image cache
pub type RasterImage = RgbaImage;

/// Tolerance for point-in-clip edge tests, in device pixels
const EDGE_EPSILON: f64 = 1e-7;

/// Drawing operations the warp renderer and compositor rely on
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Push the current transform and clip onto the state stack
    fn save(&mut self);
    /// Pop the state stack; unbalanced calls are ignored
    fn restore(&mut self);

    /// Multiply the current transform by `t` (applied before the current one)
    fn transform(&mut self, t: &Affine);
    fn set_transform(&mut self, t: Affine);

    /// Intersect the clip with a convex polygon given in user space
    fn clip_polygon(&mut self, points: &[Point2D]);

    /// Blit `image` scaled into the user-space rectangle `(x, y, w, h)`
    fn draw_image(&mut self, image: &RasterImage, x: f64, y: f64, w: f64, h: f64);

    fn fill_polygon(&mut self, points: &[Point2D], color: Rgba<u8>);
    fn fill_circle(&mut self, center: Point2D, radius: f64, color: Rgba<u8>);
    fn stroke_line(&mut self, from: Point2D, to: Point2D, width: f64, color: Rgba<u8>);

    /// Draw `text` centred on `center` with an 8px bitmap font scaled by `scale`
    fn fill_text(&mut self, text: &str, center: Point2D, scale: u32, color: Rgba<u8>);

    fn clip_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        self.clip_polygon(&[
            Point2D::new(x, y),
            Point2D::new(x + w, y),
            Point2D::new(x + w, y + h),
            Point2D::new(x, y + h),
        ]);
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Rgba<u8>) {
        self.fill_polygon(
            &[
                Point2D::new(x, y),
                Point2D::new(x + w, y),
                Point2D::new(x + w, y + h),
                Point2D::new(x, y + h),
            ],
            color,
        );
    }
}

/// Integer pixel bounds, `x1`/`y1` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelBounds {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl PixelBounds {
    fn of_points(points: &[Point2D], width: u32, height: u32) -> Self {
        if points.is_empty() {
            return Self::EMPTY;
        }
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
            return Self::EMPTY;
        }
        let clamp = |v: f64, hi: u32| v.max(0.0).min(hi as f64) as u32;
        Self {
            x0: clamp(min_x.floor(), width),
            y0: clamp(min_y.floor(), height),
            x1: clamp(max_x.ceil(), width),
            y1: clamp(max_y.ceil(), height),
        }
    }

    const EMPTY: PixelBounds = PixelBounds {
        x0: 0,
        y0: 0,
        x1: 0,
        y1: 0,
    };

    fn intersect(&self, other: &PixelBounds) -> PixelBounds {
        let b = PixelBounds {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        if b.is_empty() {
            Self::EMPTY
        } else {
            b
        }
    }

    fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// Convex clip region in device space
#[derive(Debug, Clone)]
struct ClipRegion {
    points: Vec<Point2D>,
    bounds: PixelBounds,
    /// Orientation of the polygon; zero for regions with no area
    orientation: f64,
}

impl ClipRegion {
    fn new(points: Vec<Point2D>, width: u32, height: u32) -> Self {
        let area: f64 = if points.len() < 3 {
            0.0
        } else {
            (1..points.len() - 1)
                .map(|i| cross(points[0], points[i], points[i + 1]))
                .sum()
        };
        let orientation = if area.abs() < EDGE_EPSILON {
            0.0
        } else {
            area.signum()
        };
        let bounds = if orientation == 0.0 {
            PixelBounds::EMPTY
        } else {
            PixelBounds::of_points(&points, width, height)
        };
        Self {
            points,
            bounds,
            orientation,
        }
    }

    #[inline]
    fn contains(&self, p: Point2D) -> bool {
        if self.orientation == 0.0 {
            return false;
        }
        let n = self.points.len();
        (0..n).all(|i| {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            cross(a, b, p) * self.orientation >= -EDGE_EPSILON
        })
    }
}

#[derive(Debug, Clone, Default)]
struct DrawState {
    transform: Affine,
    clips: Vec<ClipRegion>,
}

#[inline]
fn clips_contain(clips: &[ClipRegion], p: Point2D) -> bool {
    clips.iter().all(|c| c.contains(p))
}

/// Software raster surface
pub struct Canvas {
    pixels: RgbaImage,
    state: DrawState,
    stack: Vec<DrawState>,
    draw_calls: usize,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width.max(1), height.max(1)),
            state: DrawState::default(),
            stack: Vec::new(),
            draw_calls: 0,
        }
    }

    /// Reallocate the backing buffer only when the size actually changes
    ///
    /// Returns true when a reallocation happened.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if self.pixels.dimensions() == (width, height) {
            return false;
        }
        self.pixels = RgbaImage::new(width, height);
        self.reset();
        true
    }

    /// Make every pixel transparent
    pub fn clear(&mut self) {
        for p in self.pixels.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    /// Drop the state stack and return to the identity transform, no clip
    pub fn reset(&mut self) {
        self.state = DrawState::default();
        self.stack.clear();
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Image blits issued since the last [`Canvas::reset_draw_calls`]
    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    pub fn reset_draw_calls(&mut self) {
        self.draw_calls = 0;
    }

    /// Depth of the save/restore stack
    #[cfg(test)]
    pub fn save_depth(&self) -> usize {
        self.stack.len()
    }

    fn surface_bounds(&self) -> PixelBounds {
        PixelBounds {
            x0: 0,
            y0: 0,
            x1: self.pixels.width(),
            y1: self.pixels.height(),
        }
    }

    fn visible_bounds(&self) -> PixelBounds {
        self.state
            .clips
            .iter()
            .fold(self.surface_bounds(), |acc, c| acc.intersect(&c.bounds))
    }

    fn to_device(&self, points: &[Point2D]) -> Vec<Point2D> {
        points.iter().map(|p| self.state.transform.apply(*p)).collect()
    }

    /// Blend a coverage mask located at `(x0, y0)` onto the surface
    fn composite_mask(&mut self, mask: &GrayImage, x0: u32, y0: u32, color: Rgba<u8>) {
        let (width, height) = self.pixels.dimensions();
        for (mx, my, coverage) in mask.enumerate_pixels() {
            if coverage[0] == 0 {
                continue;
            }
            let (px, py) = (x0 + mx, y0 + my);
            if px >= width || py >= height {
                continue;
            }
            let center = Point2D::new(px as f64 + 0.5, py as f64 + 0.5);
            if !clips_contain(&self.state.clips, center) {
                continue;
            }
            blend(&mut self.pixels.get_pixel_mut(px, py).0, color.0, coverage[0]);
        }
    }

    fn fill_device_polygon(&mut self, device: &[Point2D], color: Rgba<u8>) {
        let (width, height) = self.pixels.dimensions();
        let bounds = PixelBounds::of_points(device, width, height).intersect(&self.visible_bounds());
        if bounds.is_empty() {
            return;
        }

        let mut poly: Vec<Point<i32>> = Vec::with_capacity(device.len());
        for p in device {
            let q = Point::new(
                (p.x - bounds.x0 as f64).round() as i32,
                (p.y - bounds.y0 as f64).round() as i32,
            );
            if poly.last() != Some(&q) {
                poly.push(q);
            }
        }
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        if poly.len() < 3 {
            return;
        }

        let mut mask = GrayImage::new(bounds.width(), bounds.height());
        draw_polygon_mut(&mut mask, &poly, Luma([255u8]));
        self.composite_mask(&mask, bounds.x0, bounds.y0, color);
    }
}

impl Surface for Canvas {
    fn width(&self) -> u32 {
        self.pixels.width()
    }

    fn height(&self) -> u32 {
        self.pixels.height()
    }

    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn transform(&mut self, t: &Affine) {
        self.state.transform = self.state.transform.then(t);
    }

    fn set_transform(&mut self, t: Affine) {
        self.state.transform = t;
    }

    fn clip_polygon(&mut self, points: &[Point2D]) {
        let device = self.to_device(points);
        let region = ClipRegion::new(device, self.pixels.width(), self.pixels.height());
        self.state.clips.push(region);
    }

    fn draw_image(&mut self, image: &RasterImage, x: f64, y: f64, w: f64, h: f64) {
        let (iw, ih) = image.dimensions();
        if iw == 0 || ih == 0 || w <= 0.0 || h <= 0.0 {
            return;
        }
        self.draw_calls += 1;

        let full = self
            .state
            .transform
            .then(&Affine::translate(x, y))
            .then(&Affine::scale(w / iw as f64, h / ih as f64));
        let Some(inverse) = full.inverse() else {
            return;
        };

        let corners = [
            full.apply(Point2D::new(0.0, 0.0)),
            full.apply(Point2D::new(iw as f64, 0.0)),
            full.apply(Point2D::new(iw as f64, ih as f64)),
            full.apply(Point2D::new(0.0, ih as f64)),
        ];
        let (width, height) = self.pixels.dimensions();
        let bounds = PixelBounds::of_points(&corners, width, height).intersect(&self.visible_bounds());
        if bounds.is_empty() {
            return;
        }

        let stride = width as usize * 4;
        let src: &[u8] = image.as_raw();
        let src_stride = iw as usize * 4;
        let clips = &self.state.clips;
        let buf: &mut [u8] = &mut self.pixels;
        let rows = &mut buf[bounds.y0 as usize * stride..bounds.y1 as usize * stride];

        rows.par_chunks_mut(stride).enumerate().for_each(|(i, row)| {
            let py = bounds.y0 as f64 + i as f64 + 0.5;
            for px in bounds.x0..bounds.x1 {
                let center = Point2D::new(px as f64 + 0.5, py);
                if !clips_contain(clips, center) {
                    continue;
                }
                let s = inverse.apply(center);
                if s.x < -EDGE_EPSILON
                    || s.y < -EDGE_EPSILON
                    || s.x > iw as f64 + EDGE_EPSILON
                    || s.y > ih as f64 + EDGE_EPSILON
                {
                    continue;
                }
                let pixel = bilinear_sample(
                    src,
                    src_stride,
                    iw as usize,
                    ih as usize,
                    s.x - 0.5,
                    s.y - 0.5,
                );
                let offset = px as usize * 4;
                blend(&mut row[offset..offset + 4], pixel, 255);
            }
        });
    }

    fn fill_polygon(&mut self, points: &[Point2D], color: Rgba<u8>) {
        if points.len() < 3 {
            return;
        }
        let device = self.to_device(points);
        self.fill_device_polygon(&device, color);
    }

    fn fill_circle(&mut self, center: Point2D, radius: f64, color: Rgba<u8>) {
        let c = self.state.transform.apply(center);
        let r = radius * self.state.transform.mean_scale();
        if r <= 0.0 {
            return;
        }
        let (width, height) = self.pixels.dimensions();
        let extent = [
            Point2D::new(c.x - r - 1.0, c.y - r - 1.0),
            Point2D::new(c.x + r + 1.0, c.y + r + 1.0),
        ];
        let bounds = PixelBounds::of_points(&extent, width, height).intersect(&self.visible_bounds());
        if bounds.is_empty() {
            return;
        }

        let mut mask = GrayImage::new(bounds.width(), bounds.height());
        draw_filled_circle_mut(
            &mut mask,
            (
                (c.x - bounds.x0 as f64).round() as i32,
                (c.y - bounds.y0 as f64).round() as i32,
            ),
            r.round() as i32,
            Luma([255u8]),
        );
        self.composite_mask(&mask, bounds.x0, bounds.y0, color);
    }

    fn stroke_line(&mut self, from: Point2D, to: Point2D, width: f64, color: Rgba<u8>) {
        let a = self.state.transform.apply(from);
        let b = self.state.transform.apply(to);
        let len = a.distance(b);
        if len == 0.0 || width <= 0.0 {
            return;
        }
        let half = width * self.state.transform.mean_scale() / 2.0;
        let (nx, ny) = (-(b.y - a.y) / len * half, (b.x - a.x) / len * half);
        let quad = [
            Point2D::new(a.x + nx, a.y + ny),
            Point2D::new(b.x + nx, b.y + ny),
            Point2D::new(b.x - nx, b.y - ny),
            Point2D::new(a.x - nx, a.y - ny),
        ];
        self.fill_device_polygon(&quad, color);
    }

    fn fill_text(&mut self, text: &str, center: Point2D, scale: u32, color: Rgba<u8>) {
        let chars = text.chars().count() as u32;
        if chars == 0 {
            return;
        }
        let scale = ((scale as f64 * self.state.transform.mean_scale()).round() as u32).max(1);
        let c = self.state.transform.apply(center);
        let text_w = chars * 8 * scale;
        let text_h = 8 * scale;

        let left = c.x - text_w as f64 / 2.0;
        let top = c.y - text_h as f64 / 2.0;
        let (width, height) = self.pixels.dimensions();
        let extent = [
            Point2D::new(left, top),
            Point2D::new(left + text_w as f64, top + text_h as f64),
        ];
        let bounds = PixelBounds::of_points(&extent, width, height).intersect(&self.visible_bounds());
        if bounds.is_empty() {
            return;
        }

        let origin_x = left.round() as i64 - bounds.x0 as i64;
        let origin_y = top.round() as i64 - bounds.y0 as i64;
        let mut mask = GrayImage::new(bounds.width(), bounds.height());
        for (i, ch) in text.chars().enumerate() {
            let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
                continue;
            };
            let cell_x = origin_x + (i as u32 * 8 * scale) as i64;
            for (row_idx, row_bits) in glyph.iter().enumerate() {
                for col_idx in 0..8u32 {
                    if (row_bits >> col_idx) & 1 == 0 {
                        continue;
                    }
                    for sy in 0..scale {
                        for sx in 0..scale {
                            let tx = cell_x + (col_idx * scale + sx) as i64;
                            let ty = origin_y + (row_idx as u32 * scale + sy) as i64;
                            if tx >= 0 && ty >= 0 && (tx as u32) < mask.width() && (ty as u32) < mask.height() {
                                mask.put_pixel(tx as u32, ty as u32, Luma([255u8]));
                            }
                        }
                    }
                }
            }
        }
        self.composite_mask(&mask, bounds.x0, bounds.y0, color);
    }
}

/// Source-over blend of `src` into `dst`, with `coverage` scaling source alpha
#[inline]
fn blend(dst: &mut [u8], src: [u8; 4], coverage: u8) {
    let a = src[3] as u32 * coverage as u32 / 255;
    if a == 0 {
        return;
    }
    if a == 255 {
        dst[..3].copy_from_slice(&src[..3]);
        dst[3] = 255;
        return;
    }
    let inv = 255 - a;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * a + dst[c] as u32 * inv) / 255) as u8;
    }
    dst[3] = (a + dst[3] as u32 * inv / 255) as u8;
}

/// Bilinear interpolation on a packed RGBA buffer
#[inline]
fn bilinear_sample(src: &[u8], stride: usize, width: usize, height: usize, x: f64, y: f64) -> [u8; 4] {
    let x = x.max(0.0).min((width - 1) as f64);
    let y = y.max(0.0).min((height - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let mut result = [0u8; 4];

    for (c, out) in result.iter_mut().enumerate() {
        let p00 = src.get(y0 * stride + x0 * 4 + c).copied().unwrap_or(0) as f64;
        let p10 = src.get(y0 * stride + x1 * 4 + c).copied().unwrap_or(0) as f64;
        let p01 = src.get(y1 * stride + x0 * 4 + c).copied().unwrap_or(0) as f64;
        let p11 = src.get(y1 * stride + x1 * 4 + c).copied().unwrap_or(0) as f64;

        let value = p00 * (1.0 - fx) * (1.0 - fy)
            + p10 * fx * (1.0 - fy)
            + p01 * (1.0 - fx) * fy
            + p11 * fx * fy;

        *out = value.round().clamp(0.0, 255.0) as u8;
    }

    result
}
