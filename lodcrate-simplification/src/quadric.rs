//! Quadric error metric

use std::ops::{Add, AddAssign};

use lodcrate_core::{Point3f, Vector3f};
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// Symmetric 4x4 quadric accumulating squared distances to planes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadric {
    pub matrix: Matrix4<f64>,
}

impl Default for Quadric {
    fn default() -> Self {
        Self::zero()
    }
}

fn to_f64(p: &Point3f) -> Vector3<f64> {
    Vector3::new(p.x as f64, p.y as f64, p.z as f64)
}

impl Quadric {
    pub fn zero() -> Self {
        Self {
            matrix: Matrix4::zeros(),
        }
    }

    /// Quadric of the plane `ax + by + cz + d = 0` with unit normal, scaled by `weight`
    pub fn from_plane(plane: Vector4<f64>, weight: f64) -> Self {
        Self {
            matrix: plane * plane.transpose() * weight,
        }
    }

    /// Plane quadric through a triangle. Degenerate triangles give the zero quadric.
    pub fn from_triangle(p0: &Point3f, p1: &Point3f, p2: &Point3f, weight: f64) -> Self {
        let (a, b, c) = (to_f64(p0), to_f64(p1), to_f64(p2));
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        if !(len > 1e-20) {
            return Self::zero();
        }
        let n = n / len;
        Self::from_plane(Vector4::new(n.x, n.y, n.z, -n.dot(&a)), weight)
    }

    /// Plane through edge `p0`-`p1` perpendicular to the face with `face_normal`.
    /// Penalises sliding a vertex off a feature edge.
    pub fn edge_constraint(p0: &Point3f, p1: &Point3f, face_normal: &Vector3f, weight: f64) -> Self {
        let (a, b) = (to_f64(p0), to_f64(p1));
        let fn64 = Vector3::new(face_normal.x as f64, face_normal.y as f64, face_normal.z as f64);
        let n = (b - a).cross(&fn64);
        let len = n.norm();
        if !(len > 1e-20) {
            return Self::zero();
        }
        let n = n / len;
        Self::from_plane(Vector4::new(n.x, n.y, n.z, -n.dot(&a)), weight)
    }

    pub fn evaluate(&self, p: &Point3f) -> f64 {
        let v = Vector4::new(p.x as f64, p.y as f64, p.z as f64, 1.0);
        (v.transpose() * self.matrix * v)[0].max(0.0)
    }

    /// Position minimising the quadric, if the system is well conditioned
    pub fn optimal(&self) -> Option<Point3f> {
        let a: Matrix3<f64> = self.matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let b: Vector3<f64> = self.matrix.fixed_view::<3, 1>(0, 3).into_owned();
        let scale = a.amax();
        if !(scale > 0.0) || a.determinant().abs() < 1e-9 * scale * scale * scale {
            return None;
        }
        let p = -a.try_inverse()? * b;
        if p.iter().all(|c| c.is_finite()) {
            Some(Point3f::new(p.x as f32, p.y as f32, p.z as f32))
        } else {
            None
        }
    }
}

impl Add for Quadric {
    type Output = Quadric;

    fn add(self, rhs: Quadric) -> Quadric {
        Quadric {
            matrix: self.matrix + rhs.matrix,
        }
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Quadric) {
        self.matrix += rhs.matrix;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_distance() {
        let q = Quadric::from_triangle(
            &Point3f::new(0.0, 0.0, 0.0),
            &Point3f::new(1.0, 0.0, 0.0),
            &Point3f::new(0.0, 1.0, 0.0),
            1.0,
        );
        assert_relative_eq!(q.evaluate(&Point3f::new(5.0, -3.0, 0.0)), 0.0, epsilon = 1e-9);
        assert_relative_eq!(q.evaluate(&Point3f::new(0.0, 0.0, 2.0)), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_triangle_is_zero() {
        let p = Point3f::new(1.0, 1.0, 1.0);
        assert_eq!(Quadric::from_triangle(&p, &p, &p, 1.0), Quadric::zero());
    }

    #[test]
    fn test_corner_optimum() {
        // three orthogonal planes meeting at (1, 2, 3)
        let mut q = Quadric::zero();
        q += Quadric::from_plane(Vector4::new(1.0, 0.0, 0.0, -1.0), 1.0);
        q += Quadric::from_plane(Vector4::new(0.0, 1.0, 0.0, -2.0), 1.0);
        q += Quadric::from_plane(Vector4::new(0.0, 0.0, 1.0, -3.0), 1.0);
        let p = q.optimal().unwrap();
        assert_relative_eq!(p, Point3f::new(1.0, 2.0, 3.0), epsilon = 1e-5);
    }

    #[test]
    fn test_flat_quadric_has_no_optimum() {
        let q = Quadric::from_plane(Vector4::new(0.0, 0.0, 1.0, 0.0), 1.0);
        assert!(q.optimal().is_none());
    }

    #[test]
    fn test_edge_constraint() {
        let q = Quadric::edge_constraint(
            &Point3f::new(0.0, 0.0, 0.0),
            &Point3f::new(1.0, 0.0, 0.0),
            &Vector3f::z(),
            1.0,
        );
        // moving along the edge is free, moving across it is not
        assert_relative_eq!(q.evaluate(&Point3f::new(3.0, 0.0, 0.0)), 0.0, epsilon = 1e-9);
        assert_relative_eq!(q.evaluate(&Point3f::new(0.0, 0.5, 0.0)), 0.25, epsilon = 1e-9);
    }
}
