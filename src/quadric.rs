//! Fixed-size numeric primitives: triangle-plane helpers over `nalgebra`
//! vectors, and the symmetric quadric-error matrix used to cost edge
//! contractions.

use nalgebra::{Point3, Vector3};

use crate::consts;

/// A 3D point in double precision. `nalgebra::Point3<f64>` already supplies
/// dot/cross/normalize through `Vector3`; this alias just keeps call sites
/// readable.
pub type Vec3 = Vector3<f64>;
pub type Point = Point3<f64>;

/// Normalize `v`, leaving it untouched when its length is below the
/// near-zero threshold rather than producing NaNs.
pub fn safe_normalize(v: Vec3) -> Vec3 {
    let len = v.norm();
    if len < 1e-12 {
        v
    } else {
        v / len
    }
}

/// The un-normalized face normal `(p1 - p0) x (p2 - p0)` and the triangle's
/// area. Triangles below [`consts::MIN_TRIANGLE_AREA`] have no reliable
/// normal and contribute nothing to any accumulated quadric.
pub fn cross_and_area(p0: Point, p1: Point, p2: Point) -> (Vec3, f64) {
    let cross = (p1 - p0).cross(&(p2 - p0));
    (cross, cross.norm() / 2.0)
}

/// A symmetric quadric error metric in `(A, b, c)` form: `A` is the
/// symmetric 3x3 matrix stored as its six distinct entries
/// `[Axx, Axy, Axz, Ayy, Ayz, Azz]`, `b` is the linear term, and `c` is the
/// constant term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadric {
    a: [f64; 6],
    b: Vec3,
    c: f64,
}

impl Default for Quadric {
    fn default() -> Self {
        Self::zero()
    }
}

impl Quadric {
    pub fn zero() -> Self {
        Self {
            a: [0.0; 6],
            b: Vec3::zeros(),
            c: 0.0,
        }
    }

    /// Build the quadric of the plane through `p` with unit normal `n`:
    /// `A = n n^T`, `b = -A p`, `c = p^T A p`. `n` must already be unit
    /// length; callers that can't guarantee that should go through
    /// [`Quadric::from_triangle`] instead.
    pub fn from_plane(n: Vec3, p: Point) -> Self {
        let a = [
            n.x * n.x,
            n.x * n.y,
            n.x * n.z,
            n.y * n.y,
            n.y * n.z,
            n.z * n.z,
        ];
        let a_mat = symmetric_from(&a);
        let b = -(a_mat * p.coords);
        let c = p.coords.dot(&(a_mat * p.coords));
        Self { a, b, c }
    }

    /// The plane quadric of a triangle, through its centroid, scaled by
    /// its area, or [`Quadric::zero`] when the triangle is degenerate
    /// (area < [`consts::MIN_TRIANGLE_AREA`]).
    pub fn from_triangle(p0: Point, p1: Point, p2: Point) -> Self {
        let (cross, area) = cross_and_area(p0, p1, p2);
        if area < consts::MIN_TRIANGLE_AREA {
            return Self::zero();
        }
        let n = cross / (2.0 * area);
        let centroid = Point::from((p0.coords + p1.coords + p2.coords) / 3.0);
        Self::from_plane(n, centroid).scale(area)
    }

    pub fn scale(&self, alpha: f64) -> Self {
        let mut a = self.a;
        for v in a.iter_mut() {
            *v *= alpha;
        }
        Self {
            a,
            b: self.b * alpha,
            c: self.c * alpha,
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        let mut a = self.a;
        for i in 0..6 {
            a[i] += other.a[i];
        }
        Self {
            a,
            b: self.b + other.b,
            c: self.c + other.c,
        }
    }

    fn matrix(&self) -> nalgebra::Matrix3<f64> {
        symmetric_from(&self.a)
    }

    /// `p^T A p + 2 b^T p + c`.
    pub fn evaluate(&self, p: Point) -> f64 {
        let ap = self.matrix() * p.coords;
        p.coords.dot(&ap) + 2.0 * self.b.dot(&p.coords) + self.c
    }

    /// The point minimizing [`Quadric::evaluate`] between `p0` and `p1`.
    /// Solves `A x = -b` via the closed-form inverse; when `A` is singular
    /// (|det A| below [`consts::SINGULARITY_THRESHOLD`]), falls back to
    /// whichever of `p0`, `p1` or their midpoint has the lowest error, so
    /// this always returns a finite point.
    pub fn optimal(&self, p0: Point, p1: Point) -> Point {
        let m = self.matrix();
        let det = m.determinant();
        if det.abs() > consts::SINGULARITY_THRESHOLD {
            if let Some(inv) = m.try_inverse() {
                return Point::from(inv * (-self.b));
            }
        }
        let mid = Point::from((p0.coords + p1.coords) / 2.0);
        // p0/p1 come first so a tie is broken toward the midpoint, the
        // geometrically preferred choice for a singular (e.g. coplanar) quadric.
        let candidates = [p0, p1, mid];
        let mut best = candidates[0];
        let mut best_err = self.evaluate(best);
        for &cand in &candidates[1..] {
            let err = self.evaluate(cand);
            if err <= best_err {
                best_err = err;
                best = cand;
            }
        }
        best
    }
}

fn symmetric_from(a: &[f64; 6]) -> nalgebra::Matrix3<f64> {
    nalgebra::Matrix3::new(a[0], a[1], a[2], a[1], a[3], a[4], a[2], a[4], a[5])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::relative_eq;

    #[test]
    fn quadric_symmetry_and_additivity() {
        let q1 = Quadric::from_plane(Vec3::new(0.0, 0.0, 1.0), Point::new(0.0, 0.0, 1.0));
        let q2 = Quadric::from_plane(Vec3::new(1.0, 0.0, 0.0), Point::new(1.0, 0.0, 0.0));
        let p = Point::new(0.3, 0.7, -0.4);

        let sum = q1.add(&q2);
        assert!(relative_eq!(
            sum.evaluate(p),
            q1.evaluate(p) + q2.evaluate(p),
            epsilon = 1e-9
        ));

        let scaled = q1.scale(2.5);
        assert!(relative_eq!(
            scaled.evaluate(p),
            2.5 * q1.evaluate(p),
            epsilon = 1e-9
        ));
    }

    #[test]
    fn optimal_of_coplanar_pair_is_midpoint() {
        // Two coplanar triangles sharing the z=0 plane: the quadric is
        // singular in the plane's tangent directions, so Optimal must fall
        // back to picking among p0/p1/midpoint.
        let q = Quadric::from_plane(Vec3::new(0.0, 0.0, 1.0), Point::new(0.0, 0.0, 0.0));
        let p0 = Point::new(-1.0, 0.0, 0.0);
        let p1 = Point::new(1.0, 0.0, 0.0);
        let opt = q.optimal(p0, p1);
        assert!(relative_eq!(q.evaluate(opt), 0.0, epsilon = 1e-9));
    }

    #[test]
    fn degenerate_triangle_contributes_zero() {
        let p0 = Point::new(0.0, 0.0, 0.0);
        let p1 = Point::new(1e-8, 0.0, 0.0);
        let p2 = Point::new(2e-8, 0.0, 0.0);
        let q = Quadric::from_triangle(p0, p1, p2);
        assert_eq!(q, Quadric::zero());
    }
}
