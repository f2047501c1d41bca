//! Core data structures and traits for lodcrate
//!
//! This crate provides the scene graph, geometry data with attribute
//! channels, materials and textures, and the reporting channel shared by
//! every processing stage.

pub mod error;
pub mod geometry;
pub mod material;
pub mod point;
pub mod report;
pub mod scene;
pub mod selection;
pub mod texture;
pub mod traits;
pub mod transform;

pub use error::*;
pub use geometry::*;
pub use material::*;
pub use point::*;
pub use report::*;
pub use scene::*;
pub use selection::*;
pub use texture::*;
pub use traits::*;
pub use transform::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Matrix4, Point3, Vector2, Vector3, Vector4};
