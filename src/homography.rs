//! Perspective (homography) solver
//!
//! Computes the 3x3 projective transform that maps one quad onto another.
//! The texture warp uses it with the source image's own rectangle as the
//! source quad and the floor outline as the destination.

use nalgebra::Matrix3;

use crate::error::WarpError;
use crate::geometry::{Point2D, Quad};

/// Smallest pivot magnitude accepted during elimination
const PIVOT_EPSILON: f64 = 1e-9;

/// Projective transform, bottom-right coefficient normalized to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    #[cfg(test)]
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Coefficients in row-major order `[h0 .. h8]`
    #[cfg(test)]
    pub fn coefficients(&self) -> [f64; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    /// Map a point through the transform
    #[inline]
    pub fn apply(&self, p: Point2D) -> Point2D {
        let m = &self.matrix;
        let w = m[(2, 0)] * p.x + m[(2, 1)] * p.y + m[(2, 2)];
        Point2D::new(
            (m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 2)]) / w,
            (m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 2)]) / w,
        )
    }

    /// The reverse mapping, renormalized so the last coefficient is 1
    pub fn inverse(&self) -> Result<Homography, WarpError> {
        let inv = self
            .matrix
            .try_inverse()
            .ok_or(WarpError::DegenerateQuad("homography is not invertible"))?;
        let norm = inv[(2, 2)];
        if norm.abs() < PIVOT_EPSILON {
            return Err(WarpError::DegenerateQuad("inverse maps a point to infinity"));
        }
        Ok(Homography { matrix: inv / norm })
    }
}

/// Compute the homography mapping `src` corners onto `dst` corners
///
/// Each correspondence `(x, y) -> (x', y')` contributes two rows of the
/// linearized system
/// `h0 x + h1 y + h2 - h6 x x' - h7 y x' = x'` and
/// `h3 x + h4 y + h5 - h6 x y' - h7 y y' = y'`.
pub fn compute_homography(src: &Quad, dst: &Quad) -> Result<Homography, WarpError> {
    if src.is_degenerate() {
        return Err(WarpError::DegenerateQuad("source quad has collinear corners"));
    }
    if dst.is_degenerate() {
        return Err(WarpError::DegenerateQuad("destination quad has collinear corners"));
    }

    let mut a = [[0.0f64; 8]; 8];
    let mut b = [0.0f64; 8];

    for (i, (s, d)) in src.points().iter().zip(dst.points()).enumerate() {
        let (x, y) = (s.x, s.y);
        let (xp, yp) = (d.x, d.y);

        a[i * 2] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * xp, -y * xp];
        b[i * 2] = xp;

        a[i * 2 + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * yp, -y * yp];
        b[i * 2 + 1] = yp;
    }

    let h = solve_linear_system(&mut a, &mut b)?;

    let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(WarpError::DegenerateQuad("non-finite homography coefficients"));
    }
    Ok(Homography { matrix })
}

/// Locate `p` inside `quad` as `(u, v)` fractions of its edges
///
/// `(0, 0)` is the TL corner and `(1, 1)` the BR corner. Returns `None` for
/// points outside the quad.
pub fn locate_in_quad(quad: &Quad, p: Point2D) -> Result<Option<Point2D>, WarpError> {
    let inverse = compute_homography(&Quad::from_size(1.0, 1.0), quad)?.inverse()?;
    let uv = inverse.apply(p);
    let inside = (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y);
    Ok(inside.then_some(uv))
}

/// Solve an 8x8 linear system using Gaussian elimination with partial pivoting
fn solve_linear_system(a: &mut [[f64; 8]; 8], b: &mut [f64; 8]) -> Result<[f64; 8], WarpError> {
    let n = 8;

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }

        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        if pivot.abs() < PIVOT_EPSILON {
            return Err(WarpError::DegenerateQuad("singular system"));
        }

        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2D, b: Point2D, tol: f64) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_identity_transform() {
        let rect = Quad::from_size(100.0, 100.0);
        let h = compute_homography(&rect, &rect).unwrap();

        let expected = Homography::identity().coefficients();
        for (got, want) in h.coefficients().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_corners_round_trip() {
        let src = Quad::from_size(1000.0, 1000.0);
        let dst = Quad::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(800.0, 50.0),
            Point2D::new(850.0, 700.0),
            Point2D::new(0.0, 650.0),
        );
        let h = compute_homography(&src, &dst).unwrap();

        for (s, d) in src.points().iter().zip(dst.points()) {
            assert_close(h.apply(*s), *d, 1e-6);
        }
    }

    #[test]
    fn test_floor_quad_round_trip() {
        // Typical floor outline: narrow far edge, wide near edge
        let src = Quad::from_size(512.0, 512.0);
        let dst = Quad::new(
            Point2D::new(200.0, 1400.0),
            Point2D::new(2400.0, 1400.0),
            Point2D::new(2600.0, 2000.0),
            Point2D::new(0.0, 2000.0),
        );
        let h = compute_homography(&src, &dst).unwrap();

        for (s, d) in src.points().iter().zip(dst.points()) {
            assert_close(h.apply(*s), *d, 1e-6);
        }
    }

    #[test]
    fn test_inverse_maps_back() {
        let src = Quad::from_size(640.0, 480.0);
        let dst = Quad::new(
            Point2D::new(64.0, 48.0),
            Point2D::new(576.0, 30.0),
            Point2D::new(600.0, 450.0),
            Point2D::new(40.0, 430.0),
        );
        let h = compute_homography(&src, &dst).unwrap();
        let inv = h.inverse().unwrap();

        let p = Point2D::new(320.0, 240.0);
        assert_close(inv.apply(h.apply(p)), p, 1e-6);
    }

    #[test]
    fn test_locate_in_floor_quad() {
        let floor = Quad::new(
            Point2D::new(200.0, 1400.0),
            Point2D::new(2400.0, 1400.0),
            Point2D::new(2600.0, 2000.0),
            Point2D::new(0.0, 2000.0),
        );

        let near_br = locate_in_quad(&floor, Point2D::new(2590.0, 1995.0)).unwrap().unwrap();
        assert!(near_br.x > 0.98 && near_br.x < 1.0);
        assert!(near_br.y > 0.98 && near_br.y < 1.0);

        // trapezoid: the horizontal midline sits at the near-edge half
        let mid = locate_in_quad(&floor, Point2D::new(1300.0, 1700.0)).unwrap().unwrap();
        assert!((mid.x - 0.5).abs() < 1e-6);

        assert_eq!(locate_in_quad(&floor, Point2D::new(100.0, 1450.0)).unwrap(), None);
        assert_eq!(locate_in_quad(&floor, Point2D::new(1300.0, 900.0)).unwrap(), None);
    }

    #[test]
    fn test_collinear_destination_fails() {
        let src = Quad::from_size(100.0, 100.0);
        let dst = Quad::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(50.0, 0.0),
            Point2D::new(100.0, 0.0),
            Point2D::new(0.0, 100.0),
        );
        assert!(matches!(
            compute_homography(&src, &dst),
            Err(WarpError::DegenerateQuad(_))
        ));
    }

    #[test]
    fn test_singular_system_fails() {
        let mut a = [[0.0f64; 8]; 8];
        let mut b = [1.0f64; 8];
        for (i, row) in a.iter_mut().enumerate().take(7) {
            row[i] = 1.0;
        }
        assert!(solve_linear_system(&mut a, &mut b).is_err());
    }
}
