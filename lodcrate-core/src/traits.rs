//! Core traits for lodcrate

use crate::point::*;

/// Anything with an axis-aligned extent in 3D
pub trait Bounded {
    /// Minimum and maximum corners of the bounding box
    fn bounding_box(&self) -> (Point3f, Point3f);

    fn center(&self) -> Point3f {
        let (min, max) = self.bounding_box();
        nalgebra::center(&min, &max)
    }

    /// Half the bounding box diagonal
    fn radius(&self) -> f32 {
        let (min, max) = self.bounding_box();
        (max - min).norm() * 0.5
    }
}
