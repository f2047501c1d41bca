//! Geometry reduction algorithms
//!
//! This crate provides the geometry stages used by the lodcrate processors:
//! - Quadric edge collapse reduction with feature-edge constraints,
//!   visibility weights and mirror symmetry
//! - Quad detection and quad-preserving reduction
//! - Vertex-clustering remeshing with hole filling
//! - Welding, T-junction removal and normal calculation
//! - Modular seam analysis, persistence and seam-constrained replay

pub mod edge_collapse;
pub mod normals;
pub mod quad_reduction;
pub mod quadric;
pub mod remesh;
pub mod repair;
pub mod seams;
pub mod settings;
pub mod symmetry;

pub use edge_collapse::*;
pub use normals::*;
pub use quad_reduction::*;
pub use quadric::*;
pub use remesh::*;
pub use repair::*;
pub use seams::*;
pub use settings::*;
pub use symmetry::*;

use lodcrate_core::{GeometryData, Result};

/// Simplify a geometry by reducing the number of triangles
pub trait MeshSimplifier {
    /// Simplify with target reduction ratio (0.0 = no reduction, 1.0 = maximum reduction)
    fn simplify(&self, geometry: &GeometryData, reduction_ratio: f32) -> Result<GeometryData>;
}
