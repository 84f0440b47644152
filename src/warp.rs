//! Triangulated perspective warp
//!
//! A raster surface can only blit images through affine transforms, so the
//! projective floor mapping is approximated by a mesh: the source rectangle
//! is cut into a uniform grid, every cell corner is pushed through the
//! homography, and each cell is drawn as two affine-mapped triangles. The
//! result is exact at the mesh vertices and linear in between.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::{Affine, Point2D, Quad};
use crate::homography::compute_homography;
use crate::surface::{RasterImage, Surface};

/// Triangles whose source determinant falls below this are not drawn
const MIN_TRIANGLE_DET: f64 = 1e-3;

/// Subdivision of the source rectangle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WarpGrid {
    pub cols: u32,
    pub rows: u32,
}

impl Default for WarpGrid {
    fn default() -> Self {
        Self { cols: 20, rows: 20 }
    }
}

impl WarpGrid {
    #[cfg(test)]
    pub fn cells(&self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

/// Outcome of one warp draw
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct WarpReport {
    /// Triangles blitted onto the surface
    pub drawn: usize,
    /// Triangles dropped for having no area
    pub skipped: usize,
}

/// Draw `image` perspective-mapped onto the quad `dest` (TL, TR, BR, BL)
///
/// Never fails: bad input is logged and leaves the surface untouched.
pub fn draw_warped_image<S: Surface + ?Sized>(
    surface: &mut S,
    image: &RasterImage,
    dest: &[Point2D],
    grid: WarpGrid,
) -> WarpReport {
    let Some(dest) = Quad::from_slice(dest) else {
        warn!("Warp skipped: expected 4 destination points, got {}", dest.len());
        return WarpReport::default();
    };
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || grid.cols == 0 || grid.rows == 0 {
        warn!(
            "Warp skipped: empty source {}x{} or grid {}x{}",
            width, height, grid.cols, grid.rows
        );
        return WarpReport::default();
    }

    let src = Quad::from_size(width as f64, height as f64);
    let homography = match compute_homography(&src, &dest) {
        Ok(h) => h,
        Err(e) => {
            warn!("Warp skipped: {}", e);
            return WarpReport::default();
        }
    };

    let cell_w = width as f64 / grid.cols as f64;
    let cell_h = height as f64 / grid.rows as f64;
    let stride = grid.cols as usize + 1;

    // Map every mesh vertex once; a non-finite vertex means part of the grid
    // lies beyond the horizon and the whole overlay is dropped.
    let mut source = Vec::with_capacity(stride * (grid.rows as usize + 1));
    let mut mapped = Vec::with_capacity(source.capacity());
    for r in 0..=grid.rows {
        for c in 0..=grid.cols {
            let s = Point2D::new(c as f64 * cell_w, r as f64 * cell_h);
            let d = homography.apply(s);
            if !(d.x.is_finite() && d.y.is_finite()) {
                warn!("Warp skipped: mesh vertex ({}, {}) maps to infinity", c, r);
                return WarpReport::default();
            }
            source.push(s);
            mapped.push(d);
        }
    }

    let mut report = WarpReport::default();
    for r in 0..grid.rows as usize {
        for c in 0..grid.cols as usize {
            let tl = r * stride + c;
            let tr = tl + 1;
            let bl = tl + stride;
            let br = bl + 1;

            for [i, j, k] in [[tl, tr, br], [tl, br, bl]] {
                let drawn = render_triangle(
                    surface,
                    image,
                    [source[i], source[j], source[k]],
                    [mapped[i], mapped[j], mapped[k]],
                );
                if drawn {
                    report.drawn += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }
    }

    debug!(
        "Warped {}x{} texture: {} triangles drawn, {} skipped",
        width, height, report.drawn, report.skipped
    );
    report
}

/// The affine transform taking the three `src` vertices onto `dst`
///
/// Returns `None` when the source triangle has (almost) no area.
pub fn triangle_affine(src: [Point2D; 3], dst: [Point2D; 3]) -> Option<Affine> {
    let [s0, s1, s2] = src;
    let [d0, d1, d2] = dst;

    let den = s0.x * (s2.y - s1.y) - s1.x * s2.y + s2.x * s1.y + (s1.x - s2.x) * s0.y;
    if den.abs() < MIN_TRIANGLE_DET {
        return None;
    }

    let a = (-(s1.y - s2.y) * d0.x + (s0.y - s2.y) * d1.x - (s0.y - s1.y) * d2.x) / den;
    let b = (-(s1.y - s2.y) * d0.y + (s0.y - s2.y) * d1.y - (s0.y - s1.y) * d2.y) / den;
    let c = ((s1.x - s2.x) * d0.x - (s0.x - s2.x) * d1.x + (s0.x - s1.x) * d2.x) / den;
    let d = ((s1.x - s2.x) * d0.y - (s0.x - s2.x) * d1.y + (s0.x - s1.x) * d2.y) / den;
    let e = ((s1.x * s2.y - s2.x * s1.y) * d0.x - (s0.x * s2.y - s2.x * s0.y) * d1.x
        + (s0.x * s1.y - s1.x * s0.y) * d2.x)
        / den;
    let f = ((s1.x * s2.y - s2.x * s1.y) * d0.y - (s0.x * s2.y - s2.x * s0.y) * d1.y
        + (s0.x * s1.y - s1.x * s0.y) * d2.y)
        / den;

    Some(Affine::new(a, b, c, d, e, f))
}

/// Clip to the destination triangle and blit the whole image through its affine map
fn render_triangle<S: Surface + ?Sized>(
    surface: &mut S,
    image: &RasterImage,
    src: [Point2D; 3],
    dst: [Point2D; 3],
) -> bool {
    let Some(affine) = triangle_affine(src, dst) else {
        return false;
    };

    surface.save();
    surface.clip_polygon(&dst);
    surface.transform(&affine);
    surface.draw_image(image, 0.0, 0.0, image.width() as f64, image.height() as f64);
    surface.restore();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Canvas;
    use image::{Rgba, RgbaImage};

    const TILE: Rgba<u8> = Rgba([200, 180, 120, 255]);

    fn scenario_quad() -> Vec<Point2D> {
        vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(800.0, 50.0),
            Point2D::new(850.0, 700.0),
            Point2D::new(0.0, 650.0),
        ]
    }

    #[test]
    fn test_triangle_affine_hits_vertices() {
        let src = [
            Point2D::new(0.0, 0.0),
            Point2D::new(50.0, 0.0),
            Point2D::new(50.0, 50.0),
        ];
        let dst = [
            Point2D::new(10.0, 20.0),
            Point2D::new(70.0, 25.0),
            Point2D::new(65.0, 90.0),
        ];
        let t = triangle_affine(src, dst).unwrap();
        for (s, d) in src.iter().zip(dst) {
            let p = t.apply(*s);
            assert!((p.x - d.x).abs() < 1e-9 && (p.y - d.y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_flat_triangle_is_skipped() {
        let src = [
            Point2D::new(0.0, 0.0),
            Point2D::new(10.0, 0.0),
            Point2D::new(20.0, 0.0),
        ];
        assert!(triangle_affine(src, src).is_none());
    }

    #[test]
    fn test_full_grid_draws_800_triangles() {
        let texture = RgbaImage::from_pixel(1000, 1000, TILE);
        let mut canvas = Canvas::new(900, 750);

        let report = draw_warped_image(&mut canvas, &texture, &scenario_quad(), WarpGrid::default());

        assert_eq!(report.drawn, 800);
        assert_eq!(report.skipped, 0);
        assert_eq!(canvas.draw_calls(), 800);
        assert_eq!(canvas.save_depth(), 0);
        // Interior of the quad is covered, far outside is not
        assert_eq!(*canvas.pixels().get_pixel(400, 350), TILE);
        assert_eq!(canvas.pixels().get_pixel(880, 20).0[3], 0);
    }

    #[test]
    fn test_degenerate_quad_leaves_surface_unchanged() {
        let texture = RgbaImage::from_pixel(64, 64, TILE);
        let mut canvas = Canvas::new(100, 100);
        canvas.fill_rect(10.0, 10.0, 30.0, 30.0, Rgba([1, 2, 3, 255]));
        let before = canvas.pixels().clone();

        let collinear = [
            Point2D::new(0.0, 0.0),
            Point2D::new(50.0, 50.0),
            Point2D::new(90.0, 90.0),
            Point2D::new(0.0, 90.0),
        ];
        let report = draw_warped_image(&mut canvas, &texture, &collinear, WarpGrid::default());

        assert_eq!(report, WarpReport::default());
        assert_eq!(canvas.draw_calls(), 0);
        assert_eq!(canvas.save_depth(), 0);
        assert_eq!(*canvas.pixels(), before);
    }

    #[test]
    fn test_wrong_point_count_is_noop() {
        let texture = RgbaImage::from_pixel(8, 8, TILE);
        let mut canvas = Canvas::new(50, 50);
        let report = draw_warped_image(&mut canvas, &texture, &scenario_quad()[..3], WarpGrid::default());
        assert_eq!(report.drawn, 0);
        assert!(canvas.pixels().pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_grid_density_is_tunable() {
        let texture = RgbaImage::from_pixel(100, 100, TILE);
        let mut canvas = Canvas::new(900, 750);
        let grid = WarpGrid { cols: 4, rows: 3 };
        let report = draw_warped_image(&mut canvas, &texture, &scenario_quad(), grid);
        assert_eq!(report.drawn, grid.cells() * 2);
    }
}
