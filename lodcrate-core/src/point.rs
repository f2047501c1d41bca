//! Point and vector aliases shared by every lodcrate crate

use nalgebra::{Point3, Vector2, Vector3, Vector4};

/// A 3D point with single precision coordinates
pub type Point3f = Point3<f32>;

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with single precision components
pub type Vector3f = Vector3<f32>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// A texture coordinate
pub type Vector2f = Vector2<f32>;

/// Linear RGBA color
pub type Color = Vector4<f32>;

/// Opaque white, the neutral value for color channels
pub fn white() -> Color {
    Color::new(1.0, 1.0, 1.0, 1.0)
}
