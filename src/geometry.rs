//! Plane geometry shared by the solver, the warp renderer and the compositor
//!
//! Coordinates are plain `f64` pixels. Whether a point lives in image space
//! or surface space is decided by the caller; nothing here converts between
//! the two implicitly.

use serde::{Deserialize, Serialize};

/// Relative tolerance used to decide that three points are collinear
const COLLINEAR_EPSILON: f64 = 1e-9;

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Signed area (times two) of the triangle `a, b, c`
#[inline]
pub fn cross(a: Point2D, b: Point2D, c: Point2D) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Whether `a, b, c` lie on one line, relative to the lengths involved
pub fn collinear(a: Point2D, b: Point2D, c: Point2D) -> bool {
    let scale = a.distance(b) * a.distance(c);
    if scale == 0.0 {
        return true;
    }
    cross(a, b, c).abs() <= COLLINEAR_EPSILON * scale
}

/// Four ordered corners: top-left, top-right, bottom-right, bottom-left
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Quad(pub [Point2D; 4]);

impl Quad {
    pub fn new(tl: Point2D, tr: Point2D, br: Point2D, bl: Point2D) -> Self {
        Self([tl, tr, br, bl])
    }

    /// The axis-aligned rectangle `(0,0)..(width,height)`
    pub fn from_size(width: f64, height: f64) -> Self {
        Self([
            Point2D::new(0.0, 0.0),
            Point2D::new(width, 0.0),
            Point2D::new(width, height),
            Point2D::new(0.0, height),
        ])
    }

    /// Build a quad from an arbitrary slice, which must hold exactly 4 points
    pub fn from_slice(points: &[Point2D]) -> Option<Self> {
        let points: [Point2D; 4] = points.try_into().ok()?;
        Some(Self(points))
    }

    pub fn points(&self) -> &[Point2D; 4] {
        &self.0
    }

    /// Apply `f` to every corner, keeping the winding order
    pub fn map(&self, f: impl FnMut(Point2D) -> Point2D) -> Self {
        Self(self.0.map(f))
    }

    /// True when any three of the four corners are collinear
    pub fn is_degenerate(&self) -> bool {
        let [a, b, c, d] = self.0;
        collinear(a, b, c) || collinear(a, b, d) || collinear(a, c, d) || collinear(b, c, d)
    }
}

/// 2D affine transform in canvas order:
/// `x' = a*x + c*y + e`, `y' = b*x + d*y + f`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub const fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    #[inline]
    pub fn apply(&self, p: Point2D) -> Point2D {
        Point2D::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    /// `self ∘ other`: apply `other` first, then `self`
    pub fn then(&self, other: &Affine) -> Affine {
        Affine {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Affine {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }

    /// Mean linear scale factor, used to size strokes and radii in device space
    pub fn mean_scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_quad_not_degenerate() {
        assert!(!Quad::from_size(100.0, 50.0).is_degenerate());
    }

    #[test]
    fn test_collinear_quad_is_degenerate() {
        let quad = Quad::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(100.0, 100.0),
            Point2D::new(200.0, 200.0),
            Point2D::new(0.0, 300.0),
        );
        assert!(quad.is_degenerate());
    }

    #[test]
    fn test_from_slice_requires_four_points() {
        let pts = [Point2D::new(0.0, 0.0); 3];
        assert!(Quad::from_slice(&pts).is_none());
        let pts = [Point2D::new(0.0, 0.0); 4];
        assert!(Quad::from_slice(&pts).is_some());
    }

    #[test]
    fn test_affine_inverse() {
        let t = Affine::translate(10.0, -4.0).then(&Affine::scale(2.0, 3.0));
        let inv = t.inverse().unwrap();
        let p = Point2D::new(7.0, 11.0);
        let back = inv.apply(t.apply(p));
        assert!((back.x - p.x).abs() < 1e-12);
        assert!((back.y - p.y).abs() < 1e-12);
    }

    #[test]
    fn test_then_applies_right_first() {
        let t = Affine::translate(5.0, 0.0).then(&Affine::scale(2.0, 2.0));
        let p = t.apply(Point2D::new(1.0, 1.0));
        assert_eq!(p, Point2D::new(7.0, 2.0));
    }
}
