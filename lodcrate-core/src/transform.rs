//! Node transforms

use nalgebra::{Matrix3, Matrix4, Point3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A 4x4 affine transform relating a scene node to its parent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f32>,
}

impl Transform3D {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    pub fn translation(translation: Vector3<f32>) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Rotation of `angle_degrees` about `axis`. A zero axis yields identity.
    pub fn rotation(angle_degrees: f32, axis: Vector3<f32>) -> Self {
        match Unit::try_new(axis, f32::EPSILON) {
            Some(axis) => Self {
                matrix: UnitQuaternion::from_axis_angle(&axis, angle_degrees.to_radians())
                    .to_homogeneous(),
            },
            None => Self::identity(),
        }
    }

    pub fn scaling(scale: Vector3<f32>) -> Self {
        Self {
            matrix: Matrix4::new_nonuniform_scaling(&scale),
        }
    }

    pub fn uniform_scaling(scale: f32) -> Self {
        Self {
            matrix: Matrix4::new_scaling(scale),
        }
    }

    pub fn transform_point(&self, point: &Point3<f32>) -> Point3<f32> {
        let homogeneous = self.matrix * point.to_homogeneous();
        Point3::from_homogeneous(homogeneous).unwrap_or(*point)
    }

    pub fn transform_vector(&self, vector: &Vector3<f32>) -> Vector3<f32> {
        self.matrix.fixed_view::<3, 3>(0, 0) * vector
    }

    /// Transform a surface normal with the inverse transpose and renormalize
    pub fn transform_normal(&self, normal: &Vector3<f32>) -> Vector3<f32> {
        let linear: Matrix3<f32> = self.matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let normal_matrix = linear
            .try_inverse()
            .map(|inv| inv.transpose())
            .unwrap_or(linear);
        let n = normal_matrix * normal;
        let len = n.norm();
        if len > f32::EPSILON {
            n / len
        } else {
            *normal
        }
    }

    /// `self * other`: `other` is applied first
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    pub fn inverse(self) -> Option<Self> {
        self.matrix.try_inverse().map(|matrix| Self { matrix })
    }

    pub fn is_identity(&self, epsilon: f32) -> bool {
        (self.matrix - Matrix4::identity()).norm() < epsilon
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(rhs)
    }
}

impl From<Matrix4<f32>> for Transform3D {
    fn from(matrix: Matrix4<f32>) -> Self {
        Self { matrix }
    }
}

/// Order in which [`TransformBuilder`] folds a new step into the accumulated transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformOrder {
    /// The new step is applied after everything accumulated so far
    #[default]
    PreMultiply,
    /// The new step is applied before everything accumulated so far
    PostMultiply,
}

/// Accumulates rotations, translations and scales into one transform.
///
/// Scene scripts build node transforms step by step, e.g. rotate about X,
/// then translate; the builder records each step in the configured order.
#[derive(Debug, Clone, Default)]
pub struct TransformBuilder {
    current: Transform3D,
    order: TransformOrder,
}

impl TransformBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: TransformOrder) -> Self {
        self.order = order;
        self
    }

    pub fn set_order(&mut self, order: TransformOrder) {
        self.order = order;
    }

    fn push(&mut self, step: Transform3D) {
        self.current = match self.order {
            TransformOrder::PreMultiply => step * self.current,
            TransformOrder::PostMultiply => self.current * step,
        };
    }

    pub fn add_rotation(&mut self, angle_degrees: f32, axis: Vector3<f32>) -> &mut Self {
        self.push(Transform3D::rotation(angle_degrees, axis));
        self
    }

    pub fn add_translation(&mut self, translation: Vector3<f32>) -> &mut Self {
        self.push(Transform3D::translation(translation));
        self
    }

    pub fn add_scaling(&mut self, scale: Vector3<f32>) -> &mut Self {
        self.push(Transform3D::scaling(scale));
        self
    }

    pub fn build(&self) -> Transform3D {
        self.current
    }
}
